use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::{ErrorKind, HttpError, RequestId};

/// Raw response as produced by a transport and seen by response hooks.
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        decode_json(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Final result of a request, with timing and retry metadata.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Time from request start to completion, including retries and backoff.
    pub duration: Duration,
    pub retry_count: u32,
    pub from_cache: bool,
    /// Absent for cache hits, which never create a request context.
    pub request_id: Option<RequestId>,
}

impl HttpResponse {
    pub(crate) fn completed(
        response: Response,
        duration: Duration,
        retry_count: u32,
        request_id: RequestId,
    ) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            duration,
            retry_count,
            from_cache: false,
            request_id: Some(request_id),
        }
    }

    pub(crate) fn from_cache(response: Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            duration: Duration::ZERO,
            retry_count: 0,
            from_cache: true,
            request_id: None,
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        decode_json(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn data(&self) -> &Bytes {
        &self.body
    }

    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> crate::Result<T> {
    serde_json::from_slice(body).map_err(|err| {
        HttpError::new(ErrorKind::Unknown, format!("failed to decode response body: {err}"))
            .with_code("decode")
            .with_source(err)
    })
}
