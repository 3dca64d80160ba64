use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::{HttpError, RequestDescriptor, Response};

/// Hook into the request lifecycle.
///
/// Every method defaults to passing its input through unchanged, so an
/// implementation only overrides the stages it cares about.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before every attempt, including retries.
    async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor, BoxError> {
        Ok(request)
    }

    /// Runs on successful responses only.
    async fn on_response(
        &self,
        _request: &RequestDescriptor,
        response: Response,
    ) -> Result<Response, BoxError> {
        Ok(response)
    }

    /// Runs on every failure before the retry decision.
    async fn on_error(&self, _request: &RequestDescriptor, error: HttpError) -> HttpError {
        error
    }
}

/// Ordered interceptors owned by one client. Execution order is
/// registration order.
#[derive(Clone, Default)]
pub struct InterceptorPipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub async fn apply_request(
        &self,
        mut request: RequestDescriptor,
    ) -> Result<RequestDescriptor, BoxError> {
        for interceptor in &self.interceptors {
            request = interceptor.on_request(request).await?;
        }
        Ok(request)
    }

    pub async fn apply_response(
        &self,
        request: &RequestDescriptor,
        mut response: Response,
    ) -> Result<Response, BoxError> {
        for interceptor in &self.interceptors {
            response = interceptor.on_response(request, response).await?;
        }
        Ok(response)
    }

    /// Error hooks may rewrite an error, but a cancellation stays a
    /// cancellation: any other kind returned for it is discarded.
    pub async fn apply_error(&self, request: &RequestDescriptor, mut error: HttpError) -> HttpError {
        for interceptor in &self.interceptors {
            if error.is_cancelled() {
                let preserved = error.clone();
                let replaced = interceptor.on_error(request, error).await;
                error = if replaced.is_cancelled() {
                    replaced
                } else {
                    preserved
                };
            } else {
                error = interceptor.on_error(request, error).await;
            }
        }
        error
    }
}

/// Adds `Authorization: Bearer <token>` to every request that does not set
/// `skip_auth`.
#[derive(Clone)]
pub struct BearerAuth {
    authorization: String,
}

impl BearerAuth {
    /// A `Bearer ` prefix is added unless `token` already has one.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self {
            authorization: normalize_bearer_authorization(token.as_ref()),
        }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("authorization", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Interceptor for BearerAuth {
    async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor, BoxError> {
        if request.options.skip_auth {
            return Ok(request);
        }
        Ok(request.header("Authorization", self.authorization.clone()))
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
