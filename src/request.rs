use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::cache::fingerprint;
use crate::{ErrorKind, HttpError, RequestId, RetryOptions, Timeouts};

/// Bytes transferred so far for an upload or download.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
    pub loaded: u64,
    /// Absent when the peer did not announce a length.
    pub total: Option<u64>,
}

impl Progress {
    pub fn percent(&self) -> Option<u8> {
        let total = self.total.filter(|total| *total > 0)?;
        let percent = (self.loaded.min(total) * 100) / total;
        Some(percent as u8)
    }
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Payload sent with a request.
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    Multipart(MultipartForm),
}

impl RequestBody {
    pub fn json<T: Serialize>(value: &T) -> crate::Result<Self> {
        serde_json::to_value(value).map(Self::Json).map_err(|err| {
            HttpError::new(ErrorKind::Unknown, format!("failed to encode request body: {err}"))
                .with_code("encode")
                .with_source(err)
        })
    }

    pub fn bytes(data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self::Bytes {
            data: data.into(),
            content_type: content_type.map(str::to_owned),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<()> for RequestBody {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

/// Text fields and files of a `multipart/form-data` body.
#[derive(Clone, Debug, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<(String, UploadFile)>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, name: impl Into<String>, file: UploadFile) -> Self {
        self.files.push((name.into(), file));
        self
    }

    pub(crate) fn total_len(&self) -> u64 {
        self.files.iter().map(|(_, file)| file.data.len() as u64).sum()
    }
}

/// In-memory file sent by [`HttpClient::upload`](crate::HttpClient::upload).
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Reads the file at `path`, naming the upload after its final component.
    pub async fn from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|err| {
            HttpError::new(
                ErrorKind::Unknown,
                format!("failed to read {}: {err}", path.display()),
            )
            .with_code("io")
            .with_source(err)
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        Ok(Self::new(file_name, data))
    }
}

/// Per-request behavior overrides.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    /// Merged over the client's default headers, winning on conflict.
    pub headers: BTreeMap<String, String>,
    pub enable_cache: bool,
    /// Cache TTL. Defaults to [`DEFAULT_CACHE_TTL`](crate::cache::DEFAULT_CACHE_TTL).
    pub cache_time: Option<Duration>,
    pub cancel_key: Option<String>,
    /// Explicit id; one is generated when absent.
    pub request_id: Option<RequestId>,
    pub skip_auth: bool,
    /// Replaces the message of a terminal, non-cancellation error.
    pub custom_error_message: Option<String>,
    pub retry: Option<RetryOptions>,
    pub timeout: Option<Timeouts>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn enable_cache(mut self, enable: bool) -> Self {
        self.enable_cache = enable;
        self
    }

    pub fn cache_time(mut self, ttl: Duration) -> Self {
        self.cache_time = Some(ttl);
        self
    }

    pub fn cancel_key(mut self, key: impl Into<String>) -> Self {
        self.cancel_key = Some(key.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<RequestId>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn skip_auth(mut self, skip: bool) -> Self {
        self.skip_auth = skip;
        self
    }

    pub fn custom_error_message(mut self, message: impl Into<String>) -> Self {
        self.custom_error_message = Some(message.into());
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Timeouts::uniform(timeout));
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeout = Some(timeouts);
        self
    }
}

impl From<()> for RequestOptions {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

/// Everything needed to perform one attempt of a request.
///
/// Interceptors receive and may rewrite it before every attempt.
#[derive(Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Absolute once the client has joined it with the base URL.
    pub url: String,
    pub body: RequestBody,
    pub options: RequestOptions,
    /// Zero for the first attempt, incremented for every retry.
    pub attempt: u32,
    pub timeouts: Timeouts,
    pub(crate) upload_progress: Option<ProgressCallback>,
    pub(crate) download_progress: Option<ProgressCallback>,
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.body)
            .field("options", &self.options)
            .field("attempt", &self.attempt)
            .field("timeouts", &self.timeouts)
            .field("upload_progress", &self.upload_progress.is_some())
            .field("download_progress", &self.download_progress.is_some())
            .finish()
    }
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: RequestBody::Empty,
            options: RequestOptions::default(),
            attempt: 0,
            timeouts: Timeouts::default(),
            upload_progress: None,
            download_progress: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_options(mut self, options: impl Into<RequestOptions>) -> Self {
        self.options = options.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.query.push((name.into(), value.into()));
        self
    }

    pub fn on_upload_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.upload_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_download_progress(
        mut self,
        callback: impl Fn(Progress) + Send + Sync + 'static,
    ) -> Self {
        self.download_progress = Some(Arc::new(callback));
        self
    }

    pub fn upload_progress(&self) -> Option<&ProgressCallback> {
        self.upload_progress.as_ref()
    }

    pub fn download_progress(&self) -> Option<&ProgressCallback> {
        self.download_progress.as_ref()
    }

    /// Looks up a header case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.options
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Only opted-in idempotent reads are served from cache.
    pub fn is_cacheable(&self) -> bool {
        self.options.enable_cache && (self.method == Method::GET || self.method == Method::HEAD)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(
            self.method.as_str(),
            &self.url,
            &self.options.query,
            &self.body,
        )
    }
}
