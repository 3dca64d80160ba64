use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::options::{
    ClientConfig, ClientOptions, RetryConfig, RetryOptions, TimeoutSetting, Timeouts,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_MS,
};

/// A single problem found by [`ConfigManager::validate`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigViolation {
    NegativeMaxRetries(i64),
    NegativeRetryDelay(i64),
    NegativeRequestTimeout(i64),
    NegativeResponseTimeout(i64),
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeMaxRetries(value) => {
                write!(f, "maxRetries must be non-negative (got {value})")
            }
            Self::NegativeRetryDelay(value) => {
                write!(f, "retryDelay must be non-negative (got {value})")
            }
            Self::NegativeRequestTimeout(value) => {
                write!(f, "request timeout must be non-negative (got {value})")
            }
            Self::NegativeResponseTimeout(value) => {
                write!(f, "response timeout must be non-negative (got {value})")
            }
        }
    }
}

/// Rejected client configuration, carrying every violation found.
#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid client configuration: {}", describe(.violations))]
pub struct ConfigError {
    pub violations: Vec<ConfigViolation>,
}

fn describe(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Holds the normalized client configuration.
///
/// The stored [`ClientConfig`] always has every field populated. Updates are
/// deep merges against the current state, never replacements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigManager {
    config: ClientConfig,
}

impl ConfigManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: normalize(config),
        }
    }

    /// Returns the normalized configuration.
    pub fn get(&self) -> ClientConfig {
        self.config.clone()
    }

    /// Returns typed options. Negative values are clamped to zero; run
    /// [`validate`](Self::validate) first to reject them instead.
    pub fn options(&self) -> ClientOptions {
        let (request_ms, response_ms) = match self.config.timeout {
            Some(TimeoutSetting::Uniform(ms)) => (ms, ms),
            Some(TimeoutSetting::Split { request, response }) => (
                request.unwrap_or(DEFAULT_TIMEOUT_MS),
                response.unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
            None => (DEFAULT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS),
        };
        let retry = self.config.retry.clone().unwrap_or_default();
        let max_retries = retry.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(0);

        ClientOptions {
            base_url: self.config.base_url.clone().unwrap_or_default(),
            timeouts: Timeouts {
                request: millis(request_ms),
                response: millis(response_ms),
            },
            retry: RetryOptions {
                max_retries: u32::try_from(max_retries).unwrap_or(u32::MAX),
                retry_delay: millis(retry.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
                retry_status_codes: retry.retry_status_codes.unwrap_or_default(),
                retry_on_network_error: retry.retry_on_network_error.unwrap_or(true),
            },
            enable_logging: self.config.enable_logging.unwrap_or(false),
            headers: self.config.headers.clone().unwrap_or_default(),
            success_status_codes: self.config.success_status_codes.clone().unwrap_or_default(),
        }
    }

    /// Deep-merges `patch` into the current configuration.
    pub fn update(&mut self, patch: ClientConfig) {
        self.config = normalize(deep_merge(self.config.clone(), patch));
    }

    /// Returns a new manager with `patch` deep-merged, leaving `self` intact.
    pub fn merged(&self, patch: ClientConfig) -> Self {
        let mut next = self.clone();
        next.update(patch);
        next
    }

    /// Restores every field to its default.
    pub fn reset(&mut self) {
        self.config = normalize(ClientConfig::default());
    }

    /// Returns all violations; an empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        if let Some(retry) = &self.config.retry {
            if let Some(value) = retry.max_retries.filter(|value| *value < 0) {
                violations.push(ConfigViolation::NegativeMaxRetries(value));
            }
            if let Some(value) = retry.retry_delay.filter(|value| *value < 0) {
                violations.push(ConfigViolation::NegativeRetryDelay(value));
            }
        }

        let (request, response) = match self.config.timeout {
            Some(TimeoutSetting::Uniform(ms)) => (Some(ms), Some(ms)),
            Some(TimeoutSetting::Split { request, response }) => (request, response),
            None => (None, None),
        };
        if let Some(value) = request.filter(|value| *value < 0) {
            violations.push(ConfigViolation::NegativeRequestTimeout(value));
        }
        if let Some(value) = response.filter(|value| *value < 0) {
            violations.push(ConfigViolation::NegativeResponseTimeout(value));
        }

        violations
    }

    /// Fails with every violation if the configuration is invalid.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { violations })
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

fn millis(value: i64) -> Duration {
    Duration::from_millis(value.max(0) as u64)
}

fn normalize(config: ClientConfig) -> ClientConfig {
    let retry = config.retry.unwrap_or_default();
    ClientConfig {
        base_url: Some(config.base_url.unwrap_or_default()),
        timeout: Some(normalize_timeout(config.timeout)),
        retry: Some(RetryConfig {
            max_retries: Some(retry.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)),
            retry_delay: Some(retry.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            retry_status_codes: Some(retry.retry_status_codes.unwrap_or_default()),
            retry_on_network_error: Some(retry.retry_on_network_error.unwrap_or(true)),
        }),
        enable_logging: Some(config.enable_logging.unwrap_or(false)),
        headers: Some(config.headers.unwrap_or_default()),
        success_status_codes: Some(config.success_status_codes.unwrap_or_default()),
    }
}

fn normalize_timeout(timeout: Option<TimeoutSetting>) -> TimeoutSetting {
    match timeout {
        None => TimeoutSetting::Split {
            request: Some(DEFAULT_TIMEOUT_MS),
            response: Some(DEFAULT_TIMEOUT_MS),
        },
        Some(TimeoutSetting::Uniform(ms)) => TimeoutSetting::Split {
            request: Some(ms),
            response: Some(ms),
        },
        Some(TimeoutSetting::Split { request, response }) => TimeoutSetting::Split {
            request: Some(request.unwrap_or(DEFAULT_TIMEOUT_MS)),
            response: Some(response.unwrap_or(DEFAULT_TIMEOUT_MS)),
        },
    }
}

fn deep_merge(base: ClientConfig, patch: ClientConfig) -> ClientConfig {
    ClientConfig {
        base_url: patch.base_url.or(base.base_url),
        timeout: merge_timeout(base.timeout, patch.timeout),
        retry: merge_retry(base.retry, patch.retry),
        enable_logging: patch.enable_logging.or(base.enable_logging),
        headers: merge_headers(base.headers, patch.headers),
        success_status_codes: patch.success_status_codes.or(base.success_status_codes),
    }
}

fn merge_timeout(
    base: Option<TimeoutSetting>,
    patch: Option<TimeoutSetting>,
) -> Option<TimeoutSetting> {
    match (base, patch) {
        (
            Some(TimeoutSetting::Split { request, response }),
            Some(TimeoutSetting::Split {
                request: patch_request,
                response: patch_response,
            }),
        ) => Some(TimeoutSetting::Split {
            request: patch_request.or(request),
            response: patch_response.or(response),
        }),
        (base, None) => base,
        (_, patch) => patch,
    }
}

fn merge_retry(base: Option<RetryConfig>, patch: Option<RetryConfig>) -> Option<RetryConfig> {
    match (base, patch) {
        (Some(base), Some(patch)) => Some(RetryConfig {
            max_retries: patch.max_retries.or(base.max_retries),
            retry_delay: patch.retry_delay.or(base.retry_delay),
            retry_status_codes: patch.retry_status_codes.or(base.retry_status_codes),
            retry_on_network_error: patch.retry_on_network_error.or(base.retry_on_network_error),
        }),
        (base, None) => base,
        (None, patch) => patch,
    }
}

fn merge_headers(
    base: Option<BTreeMap<String, String>>,
    patch: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (base, patch) {
        (Some(mut base), Some(patch)) => {
            base.extend(patch);
            Some(base)
        }
        (base, None) => base,
        (None, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ConfigManager, ConfigViolation};
    use crate::{ClientConfig, RetryConfig, TimeoutSetting};

    #[test]
    fn defaults_are_explicit() {
        let options = ConfigManager::default().options();
        assert_eq!(options.timeouts.request, Duration::from_millis(30_000));
        assert_eq!(options.timeouts.response, Duration::from_millis(30_000));
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.retry.retry_delay, Duration::from_millis(1_000));
        assert!(options.retry.retry_status_codes.is_empty());
        assert!(options.retry.retry_on_network_error);
        assert!(!options.enable_logging);
        assert!(options.headers.is_empty());
    }

    #[test]
    fn scalar_timeout_applies_to_both_phases() {
        let manager = ConfigManager::new(ClientConfig::new().timeout_ms(1_500));
        let options = manager.options();
        assert_eq!(options.timeouts.request, Duration::from_millis(1_500));
        assert_eq!(options.timeouts.response, Duration::from_millis(1_500));
    }

    #[test]
    fn split_timeout_fills_missing_half_with_default() {
        let manager = ConfigManager::new(ClientConfig {
            timeout: Some(TimeoutSetting::Split {
                request: Some(800),
                response: None,
            }),
            ..ClientConfig::default()
        });
        let options = manager.options();
        assert_eq!(options.timeouts.request, Duration::from_millis(800));
        assert_eq!(options.timeouts.response, Duration::from_millis(30_000));
    }

    #[test]
    fn update_deep_merges_nested_retry_and_headers() {
        let mut manager = ConfigManager::new(
            ClientConfig::new()
                .base_url("https://api.example.com")
                .header("X-App", "demo")
                .retry(RetryConfig::default().max_retries(5).retry_delay_ms(200)),
        );

        manager.update(
            ClientConfig::new()
                .header("X-Trace", "on")
                .retry(RetryConfig::default().retry_delay_ms(50)),
        );

        let options = manager.options();
        assert_eq!(options.base_url, "https://api.example.com");
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.retry.retry_delay, Duration::from_millis(50));
        assert_eq!(options.headers.get("X-App").map(String::as_str), Some("demo"));
        assert_eq!(options.headers.get("X-Trace").map(String::as_str), Some("on"));
    }

    #[test]
    fn split_timeout_patch_keeps_other_half() {
        let mut manager = ConfigManager::new(ClientConfig::new().timeout_ms(1_000));
        manager.update(ClientConfig {
            timeout: Some(TimeoutSetting::Split {
                request: None,
                response: Some(9_000),
            }),
            ..ClientConfig::default()
        });
        let options = manager.options();
        assert_eq!(options.timeouts.request, Duration::from_millis(1_000));
        assert_eq!(options.timeouts.response, Duration::from_millis(9_000));
    }

    #[test]
    fn merged_leaves_original_untouched() {
        let manager = ConfigManager::new(ClientConfig::new().base_url("https://a"));
        let next = manager.merged(ClientConfig::new().base_url("https://b"));
        assert_eq!(manager.options().base_url, "https://a");
        assert_eq!(next.options().base_url, "https://b");
    }

    #[test]
    fn validate_reports_every_violation() {
        let manager = ConfigManager::new(
            ClientConfig::new()
                .timeout_ms(-1)
                .retry(RetryConfig::default().max_retries(-2).retry_delay_ms(-3)),
        );

        let violations = manager.validate();
        assert_eq!(
            violations,
            vec![
                ConfigViolation::NegativeMaxRetries(-2),
                ConfigViolation::NegativeRetryDelay(-3),
                ConfigViolation::NegativeRequestTimeout(-1),
                ConfigViolation::NegativeResponseTimeout(-1),
            ]
        );
        let err = manager.ensure_valid().expect_err("must be invalid");
        assert!(err.to_string().contains("maxRetries must be non-negative"));
        assert!(err.to_string().contains("response timeout"));
    }

    #[test]
    fn negative_values_are_clamped_in_options() {
        let manager = ConfigManager::new(
            ClientConfig::new().retry(RetryConfig::default().max_retries(-1).retry_delay_ms(-5)),
        );
        let options = manager.options();
        assert_eq!(options.retry.max_retries, 0);
        assert_eq!(options.retry.retry_delay, Duration::ZERO);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut manager = ConfigManager::new(ClientConfig::new().enable_logging(true));
        manager.reset();
        assert_eq!(manager, ConfigManager::default());
    }
}
