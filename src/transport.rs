use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::multipart;
use tokio_util::sync::CancellationToken;

use crate::request::{MultipartForm, ProgressCallback};
use crate::{Progress, RequestBody, RequestDescriptor, Response, TransportError};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Performs one HTTP attempt.
///
/// Implementations should stop work and return
/// [`TransportError::Cancelled`] once `cancel` fires. The client also races
/// every attempt against the token, so a transport that ignores it still
/// settles promptly from the caller's point of view.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        (**self).send(request, cancel).await
    }
}

/// Default transport backed by [`reqwest`].
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client, e.g. with proxies or custom TLS roots.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn build(&self, request: &RequestDescriptor) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(header_map(request)?);
        if !request.options.query.is_empty() {
            builder = builder.query(&request.options.query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => {
                let body = serde_json::to_vec(value)
                    .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
                if request.header_value(CONTENT_TYPE.as_str()).is_none() {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                }
                builder.body(body)
            }
            RequestBody::Bytes { data, content_type } => {
                if let Some(content_type) = content_type {
                    if request.header_value(CONTENT_TYPE.as_str()).is_none() {
                        builder = builder.header(CONTENT_TYPE, content_type.as_str());
                    }
                }
                builder.body(data.clone())
            }
            RequestBody::Multipart(form) => {
                builder.multipart(multipart_form(form, request.upload_progress().cloned())?)
            }
        };
        Ok(builder)
    }

    async fn read_body(
        response: &mut reqwest::Response,
        progress: Option<&ProgressCallback>,
    ) -> Result<Bytes, reqwest::Error> {
        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or_default().min(1 << 20) as usize);
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if let Some(progress) = progress {
                progress(Progress {
                    loaded: body.len() as u64,
                    total,
                });
            }
        }
        Ok(Bytes::from(body))
    }

    async fn exchange(&self, request: &RequestDescriptor) -> Result<Response, TransportError> {
        let timeouts = request.timeouts;
        let builder = self.build(request)?;

        let mut response = tokio::time::timeout(timeouts.request, builder.send())
            .await
            .map_err(|_| TransportError::Timeout(timeouts.request))?
            .map_err(|err| classify(err, timeouts.request))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = tokio::time::timeout(
            timeouts.response,
            Self::read_body(&mut response, request.download_progress()),
        )
        .await
        .map_err(|_| TransportError::Timeout(timeouts.response))?
        .map_err(|err| classify(err, timeouts.response))?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.exchange(request) => result,
        }
    }
}

fn header_map(request: &RequestDescriptor) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::with_capacity(request.options.headers.len());
    for (name, value) in &request.options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| TransportError::InvalidRequest(format!("header name {name:?}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| TransportError::InvalidRequest(format!("header {name}: {err}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn multipart_form(
    form: &MultipartForm,
    progress: Option<ProgressCallback>,
) -> Result<multipart::Form, TransportError> {
    let total = form.total_len();
    let loaded = Arc::new(AtomicU64::new(0));
    let mut multipart = multipart::Form::new();
    for (name, value) in &form.fields {
        multipart = multipart.text(name.clone(), value.clone());
    }
    for (name, file) in &form.files {
        let length = file.data.len() as u64;
        let body = match &progress {
            Some(progress) => reqwest::Body::wrap_stream(progress_stream(
                file.data.clone(),
                Arc::clone(&loaded),
                total,
                Arc::clone(progress),
            )),
            None => reqwest::Body::from(file.data.clone()),
        };
        let mut part = multipart::Part::stream_with_length(body, length)
            .file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        }
        multipart = multipart.part(name.clone(), part);
    }
    Ok(multipart)
}

/// Streams `data` in fixed-size chunks, reporting cumulative progress over
/// the whole form as each chunk is handed to the connection.
fn progress_stream(
    data: Bytes,
    loaded: Arc<AtomicU64>,
    total: u64,
    progress: ProgressCallback,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect();
    futures_util::stream::iter(chunks).map(move |chunk| {
        let sent = loaded.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        progress(Progress {
            loaded: sent,
            total: Some(total),
        });
        Ok(chunk)
    })
}

fn classify(err: reqwest::Error, limit: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(limit)
    } else if err.is_connect() {
        TransportError::connect(err)
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_request() || err.is_body() || err.is_decode() {
        TransportError::network(err)
    } else {
        TransportError::Other(Box::new(err))
    }
}
