use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

use crate::{ErrorKind, HttpError, RetryOptions};

/// Statuses retried regardless of configuration.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Upper bound for any single backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(30_000);

const MAX_JITTER_RATIO: f64 = 0.1;

/// Decides whether a failed attempt is retried and how long to wait first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    retry_status_codes: BTreeSet<u16>,
    retry_on_network_error: bool,
}

impl RetryPolicy {
    pub fn new(options: &RetryOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            base_delay: options.retry_delay,
            retry_status_codes: options.retry_status_codes.iter().copied().collect(),
            retry_on_network_error: options.retry_on_network_error,
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new(&RetryOptions::disabled())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retry eligibility of an error class, ignoring the retry budget.
    ///
    /// Cancellation is never retryable. A status is retryable when it is in
    /// the configured set or in [`DEFAULT_RETRY_STATUS_CODES`]. Without a
    /// status, network, timeout and interceptor failures follow the
    /// `retry_on_network_error` flag.
    pub fn is_retryable(&self, kind: ErrorKind, status: Option<u16>) -> bool {
        if kind == ErrorKind::Cancelled {
            return false;
        }
        if let Some(status) = status {
            return self.retry_status_codes.contains(&status)
                || DEFAULT_RETRY_STATUS_CODES.contains(&status);
        }
        match kind {
            ErrorKind::NetworkError | ErrorKind::Timeout | ErrorKind::InterceptorError => {
                self.retry_on_network_error
            }
            _ => false,
        }
    }

    /// Returns whether another attempt should follow, given the retries
    /// already made for this request.
    pub fn should_retry(&self, error: &HttpError, retry_count: u32) -> bool {
        retry_count < self.max_retries && self.is_retryable(error.kind, error.status)
    }

    /// Jitter-free delay before the retry that follows `retry_count`
    /// previous retries, capped at [`MAX_RETRY_DELAY`].
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.raw_delay_ms(retry_count).min(max_delay_ms()))
    }

    /// Delay with up to 10% random jitter added, capped at [`MAX_RETRY_DELAY`].
    pub fn compute_delay(&self, retry_count: u32) -> Duration {
        let jitter = rand::rng().random_range(0.0..=MAX_JITTER_RATIO);
        let delay_ms = (self.raw_delay_ms(retry_count) as f64 * (1.0 + jitter))
            .min(max_delay_ms() as f64);
        Duration::from_millis(delay_ms.round() as u64)
    }

    fn raw_delay_ms(&self, retry_count: u32) -> u64 {
        let exp = retry_count.min(32);
        let multiplier = 1u64 << exp;
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        base_ms.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryOptions::default())
    }
}

impl From<&RetryOptions> for RetryPolicy {
    fn from(options: &RetryOptions) -> Self {
        Self::new(options)
    }
}

fn max_delay_ms() -> u64 {
    MAX_RETRY_DELAY.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RetryPolicy, MAX_RETRY_DELAY};
    use crate::{ErrorKind, HttpError, RetryOptions};

    fn policy(max_retries: u32, delay_ms: u64) -> RetryPolicy {
        RetryPolicy::new(&RetryOptions {
            max_retries,
            retry_delay: Duration::from_millis(delay_ms),
            ..RetryOptions::default()
        })
    }

    fn status_error(status: u16) -> HttpError {
        HttpError::new(ErrorKind::HttpStatusError, "status").with_status(status)
    }

    #[test]
    fn stops_once_budget_is_spent_for_every_kind() {
        let policy = policy(2, 100);
        let errors = [
            status_error(503),
            HttpError::new(ErrorKind::NetworkError, "reset"),
            HttpError::new(ErrorKind::Timeout, "slow"),
            HttpError::new(ErrorKind::InterceptorError, "hook"),
        ];
        for error in &errors {
            assert!(policy.should_retry(error, 1), "{error} must retry at 1");
            assert!(!policy.should_retry(error, 2), "{error} must stop at 2");
            assert!(!policy.should_retry(error, 3));
        }
    }

    #[test]
    fn never_retries_cancellation() {
        let policy = policy(5, 100);
        let cancelled = HttpError::new(ErrorKind::Cancelled, "stop");
        assert!(!policy.should_retry(&cancelled, 0));
        let cancelled_with_status = cancelled.with_status(503);
        assert!(!policy.should_retry(&cancelled_with_status, 0));
    }

    #[test]
    fn status_rules_use_configured_and_default_sets() {
        let policy = RetryPolicy::new(&RetryOptions {
            retry_status_codes: vec![418],
            ..RetryOptions::default()
        });
        assert!(policy.is_retryable(ErrorKind::HttpStatusError, Some(418)));
        assert!(policy.is_retryable(ErrorKind::HttpStatusError, Some(503)));
        assert!(policy.is_retryable(ErrorKind::HttpStatusError, Some(408)));
        assert!(!policy.is_retryable(ErrorKind::HttpStatusError, Some(404)));
        assert!(!policy.is_retryable(ErrorKind::HttpStatusError, Some(400)));
    }

    #[test]
    fn network_class_follows_flag() {
        let mut options = RetryOptions::default();
        assert!(RetryPolicy::new(&options).is_retryable(ErrorKind::NetworkError, None));
        assert!(RetryPolicy::new(&options).is_retryable(ErrorKind::Timeout, None));
        options.retry_on_network_error = false;
        assert!(!RetryPolicy::new(&options).is_retryable(ErrorKind::NetworkError, None));
        assert!(!RetryPolicy::new(&options).is_retryable(ErrorKind::Unknown, None));
    }

    #[test]
    fn base_delay_is_non_decreasing_and_capped() {
        let policy = policy(100, 1_000);
        let mut previous = Duration::ZERO;
        for retry_count in 0..80 {
            let delay = policy.base_delay(retry_count);
            assert!(delay >= previous);
            assert!(delay <= MAX_RETRY_DELAY);
            previous = delay;
        }
        assert_eq!(policy.base_delay(0), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay(1), Duration::from_millis(2_000));
        assert_eq!(policy.base_delay(2), Duration::from_millis(4_000));
        assert_eq!(policy.base_delay(10), MAX_RETRY_DELAY);
    }

    #[test]
    fn jitter_stays_within_ten_percent_and_cap() {
        let policy = policy(10, 1_000);
        for _ in 0..256 {
            let delay = policy.compute_delay(1);
            assert!(delay >= Duration::from_millis(2_000));
            assert!(delay <= Duration::from_millis(2_200));
            assert!(policy.compute_delay(12) <= MAX_RETRY_DELAY);
        }
    }

    #[test]
    fn zero_base_delay_yields_zero() {
        let policy = policy(3, 0);
        assert_eq!(policy.compute_delay(2), Duration::ZERO);
    }
}
