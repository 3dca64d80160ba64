use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::RequestId;

/// Boxed error used at the transport and interceptor seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure classes every request error is normalized into.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The request was cancelled by the caller.
    Cancelled,
    /// The transport exceeded its request or response timeout.
    Timeout,
    /// Connection or I/O failure before a response was received.
    NetworkError,
    /// The server answered with a status outside the success set.
    HttpStatusError,
    /// A request or response interceptor failed.
    InterceptorError,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::HttpStatusError => "http_status_error",
            Self::InterceptorError => "interceptor_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the request an error belongs to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorContext {
    pub request_id: Option<RequestId>,
    pub retry_count: u32,
    pub url: String,
    pub method: String,
}

impl ErrorContext {
    pub fn new(
        request_id: Option<RequestId>,
        retry_count: u32,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            retry_count,
            url: url.into(),
            method: method.into(),
        }
    }
}

/// Error type returned by this crate.
///
/// Every failure a caller sees, whether it came from the transport, a
/// non-success status, an interceptor or cancellation, is one of these.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HttpError {
    pub kind: ErrorKind,
    /// HTTP status as text for status errors, otherwise a snake_case code.
    pub code: String,
    pub message: String,
    pub status: Option<u16>,
    pub is_retryable: bool,
    pub context: ErrorContext,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl HttpError {
    /// Creates a non-retryable error whose code is the kind name.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.as_str().to_owned(),
            message: message.into(),
            status: None,
            is_retryable: false,
            context: ErrorContext::default(),
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(Arc::from(source.into()));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

/// Failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The cancellation token fired before the response completed.
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(#[source] BoxError),
    /// Failure while sending the request or reading the response.
    #[error("network error: {0}")]
    Network(#[source] BoxError),
    /// The descriptor could not be turned into a wire request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport error: {0}")]
    Other(#[source] BoxError),
}

impl TransportError {
    pub fn network(error: impl Into<BoxError>) -> Self {
        Self::Network(error.into())
    }

    pub fn connect(error: impl Into<BoxError>) -> Self {
        Self::Connect(error.into())
    }
}
