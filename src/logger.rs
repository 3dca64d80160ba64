use std::collections::BTreeMap;
use std::time::Duration;

use crate::{HttpError, RequestDescriptor, RequestId};

const SENSITIVE_HEADERS: [&str; 5] = ["authorization", "cookie", "x-token", "x-api-key", "token"];
const MASK: &str = "***";

/// Request lifecycle logging, active when `enableLogging` is set and the
/// `tracing` feature is compiled in. It never affects control flow.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Logger {
    enabled: bool,
}

impl Logger {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) fn request_started(&self, id: &RequestId, request: &RequestDescriptor) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            request_id = %id,
            method = %request.method,
            url = %request.url,
            attempt = request.attempt,
            headers = ?sanitize_headers(&request.options.headers),
            "sending request"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (id, request);
    }

    pub(crate) fn response_received(&self, id: &RequestId, status: u16, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            request_id = %id,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "response received"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (id, status, elapsed);
    }

    pub(crate) fn retry_scheduled(&self, id: &RequestId, error: &HttpError, retry: u32, delay: Duration) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::warn!(
            request_id = %id,
            kind = %error.kind,
            retry,
            delay_ms = delay.as_millis() as u64,
            "retrying request: {}",
            error.message
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (id, error, retry, delay);
    }

    pub(crate) fn request_failed(&self, id: &RequestId, error: &HttpError) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::error!(
            request_id = %id,
            kind = %error.kind,
            code = %error.code,
            status = error.status,
            retry_count = error.context.retry_count,
            "request failed: {}",
            error.message
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (id, error);
    }

    pub(crate) fn request_cancelled(&self, id: &RequestId, reason: &str) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::info!(request_id = %id, reason, "request cancelled");
        #[cfg(not(feature = "tracing"))]
        let _ = (id, reason);
    }

    pub(crate) fn cache_hit(&self, key: &str) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(cache_key = key, "served from cache");
        #[cfg(not(feature = "tracing"))]
        let _ = key;
    }
}

/// Copies `headers`, masking the values of credential-bearing headers.
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|candidate| name.eq_ignore_ascii_case(candidate));
            let value = if sensitive { MASK.to_owned() } else { value.clone() };
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::sanitize_headers;

    #[test]
    fn masks_credentials_case_insensitively() {
        let headers = BTreeMap::from([
            ("Authorization".to_owned(), "Bearer abc".to_owned()),
            ("X-Api-Key".to_owned(), "k".to_owned()),
            ("Cookie".to_owned(), "sid=1".to_owned()),
            ("Accept".to_owned(), "application/json".to_owned()),
        ]);
        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized["Authorization"], "***");
        assert_eq!(sanitized["X-Api-Key"], "***");
        assert_eq!(sanitized["Cookie"], "***");
        assert_eq!(sanitized["Accept"], "application/json");
    }
}
