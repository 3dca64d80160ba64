use crate::error::BoxError;
use crate::retry::RetryPolicy;
use crate::wire::business_message;
use crate::{ErrorContext, ErrorKind, HttpError, Response, TransportError};

/// Message used when nothing more specific is known.
pub const FALLBACK_MESSAGE: &str = "request failed, please try again later";

/// Turns transport, status, interceptor and cancellation failures into
/// [`HttpError`] values, classified against the active retry policy.
#[derive(Clone, Debug, Default)]
pub struct ErrorNormalizer {
    policy: RetryPolicy,
}

impl ErrorNormalizer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn from_transport(&self, error: TransportError, context: ErrorContext) -> HttpError {
        let (kind, code) = match &error {
            TransportError::Cancelled => (ErrorKind::Cancelled, "cancelled"),
            TransportError::Timeout(_) => (ErrorKind::Timeout, "timeout"),
            TransportError::Connect(_) => (ErrorKind::NetworkError, "connect"),
            TransportError::Network(_) => (ErrorKind::NetworkError, "network_error"),
            TransportError::InvalidRequest(_) => (ErrorKind::Unknown, "invalid_request"),
            TransportError::Other(_) => (ErrorKind::Unknown, "unknown"),
        };
        let message = non_empty(error.to_string());
        self.classify(kind, None, message)
            .with_code(code)
            .with_context(context)
            .with_source(error)
    }

    /// Error for a response whose status is outside the success set.
    pub fn from_status(&self, response: &Response, context: ErrorContext) -> HttpError {
        let status = response.status;
        let message = business_message(&response.body).unwrap_or_else(|| status_message(status));
        self.classify(ErrorKind::HttpStatusError, Some(status), Some(message))
            .with_code(status.to_string())
            .with_context(context)
    }

    /// Error for a failing request or response hook. No status is attached,
    /// so retry eligibility matches a network failure.
    pub fn from_interceptor(&self, error: BoxError, context: ErrorContext) -> HttpError {
        let message = non_empty(format!("interceptor failed: {error}"));
        self.classify(ErrorKind::InterceptorError, None, message)
            .with_context(context)
            .with_source(error)
    }

    pub fn cancelled(&self, reason: Option<&str>, context: ErrorContext) -> HttpError {
        let message = reason.unwrap_or("request cancelled").to_owned();
        HttpError::new(ErrorKind::Cancelled, message).with_context(context)
    }

    /// Recomputes `is_retryable` after an error hook may have changed the
    /// error's kind or status.
    pub fn reclassify(&self, mut error: HttpError) -> HttpError {
        error.is_retryable = self.policy.is_retryable(error.kind, error.status);
        error
    }

    fn classify(&self, kind: ErrorKind, status: Option<u16>, message: Option<String>) -> HttpError {
        let mut error = HttpError::new(kind, message.unwrap_or_else(|| FALLBACK_MESSAGE.to_owned()));
        if let Some(status) = status {
            error = error.with_status(status);
        }
        self.reclassify(error)
    }
}

/// Default human-readable message for an HTTP status.
pub fn status_message(status: u16) -> String {
    let message = match status {
        400 => "bad request",
        401 => "unauthorized, please sign in again",
        403 => "access denied",
        404 => "the requested resource was not found",
        405 => "method not allowed",
        408 => "request timed out",
        409 => "conflict with the current state of the resource",
        422 => "request validation failed",
        429 => "too many requests, please slow down",
        500 => "internal server error",
        502 => "bad gateway",
        503 => "service unavailable",
        504 => "gateway timeout",
        other => return format!("request failed with status {other}"),
    };
    message.to_owned()
}

fn non_empty(message: String) -> Option<String> {
    Some(message).filter(|message| !message.trim().is_empty())
}
