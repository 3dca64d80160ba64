use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_TIMEOUT_MS: i64 = 30_000;
pub(crate) const DEFAULT_MAX_RETRIES: i64 = 3;
pub(crate) const DEFAULT_RETRY_DELAY_MS: i64 = 1_000;

/// Raw client configuration as supplied by the caller.
///
/// Every field is optional; missing values are filled with defaults by
/// [`ConfigManager`](crate::ConfigManager). Numeric values are signed so that
/// invalid (negative) input can be reported by
/// [`ConfigManager::validate`](crate::ConfigManager::validate) instead of
/// being silently rejected at parse time.
///
/// The serde representation uses the option names of the JSON configuration
/// surface (`baseURL`, `timeout`, `retry`, `enableLogging`, `headers`,
/// `successStatusCodes`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Base URL prepended to relative request URLs.
    #[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Request/response timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSetting>,
    /// Retry behavior.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Emits request lifecycle events through `tracing` when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_logging: Option<bool>,
    /// Default headers sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Status codes treated as success. Empty means any 2xx.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_status_codes: Option<Vec<u16>>,
}

/// Timeout configuration: one value for both phases, or one per phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSetting {
    /// Applies to both the request and the response phase.
    Uniform(i64),
    /// Separate values; a missing half falls back to the default.
    Split {
        #[serde(default)]
        request: Option<i64>,
        #[serde(default)]
        response: Option<i64>,
    },
}

/// Raw retry configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
    /// Base backoff delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_status_codes: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_on_network_error: Option<bool>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reads configuration from environment variables.
    ///
    /// Reads:
    /// - `REQFLOW_BASE_URL`
    /// - `REQFLOW_TIMEOUT_MS`
    /// - `REQFLOW_MAX_RETRIES`
    /// - `REQFLOW_RETRY_DELAY_MS`
    /// - `REQFLOW_ENABLE_LOGGING`
    ///
    /// Unset or empty variables leave the field unset. Returns an error naming
    /// the variable if a value cannot be parsed.
    pub fn from_env() -> Result<Self, String> {
        let timeout = env_value("REQFLOW_TIMEOUT_MS")
            .map(|value| parse_env("REQFLOW_TIMEOUT_MS", &value))
            .transpose()?
            .map(TimeoutSetting::Uniform);

        let max_retries = env_value("REQFLOW_MAX_RETRIES")
            .map(|value| parse_env("REQFLOW_MAX_RETRIES", &value))
            .transpose()?;
        let retry_delay = env_value("REQFLOW_RETRY_DELAY_MS")
            .map(|value| parse_env("REQFLOW_RETRY_DELAY_MS", &value))
            .transpose()?;
        let retry = (max_retries.is_some() || retry_delay.is_some()).then(|| RetryConfig {
            max_retries,
            retry_delay,
            ..RetryConfig::default()
        });

        let enable_logging = env_value("REQFLOW_ENABLE_LOGGING")
            .map(|value| parse_env("REQFLOW_ENABLE_LOGGING", &value))
            .transpose()?;

        Ok(Self {
            base_url: env_value("REQFLOW_BASE_URL"),
            timeout,
            retry,
            enable_logging,
            ..Self::default()
        })
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets one timeout for both the request and the response phase.
    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout = Some(TimeoutSetting::Uniform(timeout_ms));
        self
    }

    pub fn timeout(mut self, timeout: TimeoutSetting) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = Some(enabled);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn success_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.success_status_codes = Some(codes.into_iter().collect());
        self
    }
}

impl RetryConfig {
    pub fn max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_delay_ms(mut self, retry_delay_ms: i64) -> Self {
        self.retry_delay = Some(retry_delay_ms);
        self
    }

    pub fn retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn retry_on_network_error(mut self, retry: bool) -> Self {
        self.retry_on_network_error = Some(retry);
        self
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{name} is set but is not a valid value: {value:?}"))
}

/// Normalized client options, derived from a [`ClientConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeouts: Timeouts,
    pub retry: RetryOptions,
    pub enable_logging: bool,
    pub headers: BTreeMap<String, String>,
    /// Status codes treated as success. Empty means any 2xx.
    pub success_status_codes: Vec<u16>,
}

impl ClientOptions {
    /// Returns whether `status` counts as a successful response.
    pub fn is_success(&self, status: u16) -> bool {
        if self.success_status_codes.is_empty() {
            (200..300).contains(&status)
        } else {
            self.success_status_codes.contains(&status)
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeouts: Timeouts::default(),
            retry: RetryOptions::default(),
            enable_logging: false,
            headers: BTreeMap::new(),
            success_status_codes: Vec::new(),
        }
    }
}

/// Time limits for the two phases of one attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Limit for sending the request and receiving response headers.
    pub request: Duration,
    /// Limit for reading the response body.
    pub response: Duration,
}

impl Timeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            request: timeout,
            response: timeout,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_millis(DEFAULT_TIMEOUT_MS as u64))
    }
}

/// Normalized retry behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base retry backoff (exponential strategy).
    pub retry_delay: Duration,
    /// Extra retryable status codes on top of the default set.
    pub retry_status_codes: Vec<u16>,
    pub retry_on_network_error: bool,
}

impl RetryOptions {
    /// Options that never retry.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES as u32,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS as u64),
            retry_status_codes: Vec::new(),
            retry_on_network_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, ClientOptions, RetryConfig, TimeoutSetting};

    #[test]
    fn parses_json_surface_names() {
        let config = ClientConfig::from_json_str(
            r#"{
                "baseURL": "https://api.example.com",
                "timeout": { "request": 5000 },
                "retry": { "maxRetries": 2, "retryDelay": 250, "retryStatusCodes": [418] },
                "enableLogging": true,
                "headers": { "X-App": "demo" },
                "successStatusCodes": [200, 304]
            }"#,
        )
        .expect("config must parse");

        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(
            config.timeout,
            Some(TimeoutSetting::Split {
                request: Some(5000),
                response: None
            })
        );
        assert_eq!(
            config.retry,
            Some(
                RetryConfig::default()
                    .max_retries(2)
                    .retry_delay_ms(250)
                    .retry_status_codes([418])
            )
        );
        assert_eq!(config.enable_logging, Some(true));
        assert_eq!(config.success_status_codes, Some(vec![200, 304]));
    }

    #[test]
    fn from_env_reads_only_set_variables() {
        let names = [
            "REQFLOW_BASE_URL",
            "REQFLOW_TIMEOUT_MS",
            "REQFLOW_MAX_RETRIES",
            "REQFLOW_RETRY_DELAY_MS",
            "REQFLOW_ENABLE_LOGGING",
        ];
        for name in names {
            std::env::remove_var(name);
        }
        assert_eq!(ClientConfig::from_env(), Ok(ClientConfig::default()));

        std::env::set_var("REQFLOW_BASE_URL", "https://api.example.com");
        std::env::set_var("REQFLOW_MAX_RETRIES", "5");
        std::env::set_var("REQFLOW_ENABLE_LOGGING", "true");
        let config = ClientConfig::from_env().expect("valid env");
        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.timeout, None);
        assert_eq!(config.retry, Some(RetryConfig::default().max_retries(5)));
        assert_eq!(config.enable_logging, Some(true));

        std::env::set_var("REQFLOW_TIMEOUT_MS", "soon");
        let err = ClientConfig::from_env().expect_err("invalid timeout");
        assert!(err.contains("REQFLOW_TIMEOUT_MS"));

        for name in names {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn scalar_timeout_parses_as_uniform() {
        let config = ClientConfig::from_json_str(r#"{ "timeout": 1500 }"#).expect("must parse");
        assert_eq!(config.timeout, Some(TimeoutSetting::Uniform(1500)));
    }

    #[test]
    fn success_predicate_defaults_to_2xx() {
        let mut options = ClientOptions::default();
        assert!(options.is_success(200));
        assert!(options.is_success(204));
        assert!(!options.is_success(304));

        options.success_status_codes = vec![304];
        assert!(options.is_success(304));
        assert!(!options.is_success(200));
    }
}
