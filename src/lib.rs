//! `reqflow` is an async HTTP request orchestration layer.
//!
//! It wraps a [`Transport`] (by default [`ReqwestTransport`]) and adds:
//! - retries with capped exponential backoff and jitter ([`RetryPolicy`])
//! - per-request cancellation by id, cancel key or predicate
//! - a TTL cache for opted-in `GET`/`HEAD` requests
//! - an ordered [`Interceptor`] pipeline for requests, responses and errors
//! - one normalized error type, [`HttpError`]
//!
//! ```no_run
//! use reqflow::{ClientConfig, HttpClient, RequestOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(ClientConfig::new().base_url("https://api.example.com"))?;
//! let users = client
//!     .get("/users", RequestOptions::new().query("page", "1").enable_cache(true))
//!     .await?;
//! println!("{} in {}ms", users.status, users.duration_ms());
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod client;
mod config;
mod context;
mod error;
pub mod global;
mod interceptor;
mod logger;
mod normalize;
mod options;
mod request;
mod response;
mod retry;
mod transport;
mod wire;

pub use client::{
    CancelTarget, DownloadOptions, HttpClient, HttpClientBuilder, UploadOptions, REQUEST_ID_HEADER,
};
pub use config::{ConfigError, ConfigManager, ConfigViolation};
pub use context::{CancelHandle, RequestContext, RequestContextStore, RequestId};
pub use error::{BoxError, ErrorContext, ErrorKind, HttpError, TransportError};
pub use interceptor::{BearerAuth, Interceptor, InterceptorPipeline};
pub use logger::sanitize_headers;
pub use normalize::{status_message, ErrorNormalizer, FALLBACK_MESSAGE};
pub use options::{ClientConfig, ClientOptions, RetryConfig, RetryOptions, TimeoutSetting, Timeouts};
pub use request::{
    MultipartForm, Progress, ProgressCallback, RequestBody, RequestDescriptor, RequestOptions,
    UploadFile,
};
pub use response::{HttpResponse, Response};
pub use retry::{RetryPolicy, DEFAULT_RETRY_STATUS_CODES, MAX_RETRY_DELAY};
pub use transport::{ReqwestTransport, Transport};
pub use wire::{ErrorPayload, NestedError};

pub use reqwest::{header, Method};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, HttpError>;
