//! Sync configuration.
//!
//! Provides `SyncConfig`, the settings a `SyncService` is built with: the
//! remote service base URL, how a push reacts to failed operations, and the
//! retry budget for transient failures. Loadable from JSON or from
//! `TABLESYNC_*` environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

const ENV_BASE_URL: &str = "TABLESYNC_BASE_URL";
const ENV_PUSH_MODE: &str = "TABLESYNC_PUSH_MODE";
const ENV_MAX_RETRIES: &str = "TABLESYNC_MAX_RETRIES";
const ENV_BASE_DELAY_MS: &str = "TABLESYNC_RETRY_BASE_DELAY_MS";
const ENV_MAX_DELAY_MS: &str = "TABLESYNC_RETRY_MAX_DELAY_MS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "TABLESYNC_REQUEST_TIMEOUT_SECS";

/// How a push reacts to an operation that ends up `Failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// Halt the push at the first failure; later operations wait until the
    /// failed one is resolved
    StopOnFirstError,
    /// Park the failed operation and keep draining operations on other items
    #[default]
    ContinueIndependentItems,
}

impl PushMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopOnFirstError => "stop_on_first_error",
            Self::ContinueIndependentItems => "continue_independent_items",
        }
    }
}

impl fmt::Display for PushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "stop_on_first_error" | "strict" => Ok(Self::StopOnFirstError),
            "continue_independent_items" | "continue" => Ok(Self::ContinueIndependentItems),
            other => Err(Error::Configuration(format!("unknown push mode '{other}'"))),
        }
    }
}

/// Exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt before the operation is failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Never retry; the first transient failure fails the operation
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Retry without waiting (tests, foreground pushes)
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Settings for one sync queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Remote service root, e.g. `https://app.example.com`
    pub base_url: String,
    #[serde(default)]
    pub push_mode: PushMode,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl SyncConfig {
    /// Create a configuration with default push mode and retry policy
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            push_mode: PushMode::default(),
            retry: RetryPolicy::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        })
    }

    #[must_use]
    pub const fn with_push_mode(mut self, push_mode: PushMode) -> Self {
        self.push_mode = push_mode;
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the request timeout, rounded up to whole seconds (at least one)
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        let mut secs = timeout.as_secs();
        if timeout.subsec_nanos() > 0 || secs == 0 {
            secs = secs.saturating_add(1);
        }
        self.request_timeout_secs = secs;
        self
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse a JSON configuration document
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Configuration(format!("invalid sync config JSON: {error}")))?;
        config.validated()
    }

    /// Load from `TABLESYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup using the environment variable names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = normalize_text_option(lookup(ENV_BASE_URL))
            .ok_or_else(|| Error::Configuration(format!("{ENV_BASE_URL} is not set")))?;
        let mut config = Self::new(base_url)?;

        if let Some(mode) = normalize_text_option(lookup(ENV_PUSH_MODE)) {
            config.push_mode = mode.parse()?;
        }
        if let Some(value) = parse_number(&lookup, ENV_MAX_RETRIES)? {
            config.retry.max_retries = u32::try_from(value).map_err(|_| {
                Error::Configuration(format!("{ENV_MAX_RETRIES} is out of range"))
            })?;
        }
        if let Some(value) = parse_number(&lookup, ENV_BASE_DELAY_MS)? {
            config.retry.base_delay_ms = value;
        }
        if let Some(value) = parse_number(&lookup, ENV_MAX_DELAY_MS)? {
            config.retry.max_delay_ms = value;
        }
        if let Some(value) = parse_number(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            config.request_timeout_secs = value;
        }

        config.validated()
    }

    fn validated(mut self) -> Result<Self> {
        self.base_url = normalize_base_url(self.base_url)?;
        if self.request_timeout_secs == 0 {
            return Err(Error::Configuration(
                "request timeout must be at least one second".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Configuration(
                "retry base delay must not exceed the max delay".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    normalize_text_option(lookup(key))
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| Error::Configuration(format!("{key} must be a non-negative integer")))
        })
        .transpose()
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Configuration("base URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Configuration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

const fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

const fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn new_trims_trailing_slash() {
        let config = SyncConfig::new(" https://app.example.com/ ").unwrap();
        assert_eq!(config.base_url, "https://app.example.com");
        assert_eq!(config.push_mode, PushMode::ContinueIndependentItems);
    }

    #[test]
    fn new_rejects_invalid_base_url() {
        assert!(SyncConfig::new("").is_err());
        assert!(SyncConfig::new("app.example.com").is_err());
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn from_json_applies_defaults() {
        let config = SyncConfig::from_json(r#"{ "base_url": "https://app.example.com/" }"#).unwrap();
        assert_eq!(config.base_url, "https://app.example.com");
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn sub_second_request_timeout_rounds_up() {
        let config = SyncConfig::new("https://app.example.com").unwrap();

        let short = config.clone().with_request_timeout(Duration::from_millis(500));
        assert_eq!(short.request_timeout(), Duration::from_secs(1));
        assert!(short.validated().is_ok());

        let fractional = config.clone().with_request_timeout(Duration::from_millis(2_500));
        assert_eq!(fractional.request_timeout(), Duration::from_secs(3));

        let zero = config.with_request_timeout(Duration::ZERO);
        assert_eq!(zero.request_timeout_secs, 1);
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let error = SyncConfig::from_json(
            r#"{ "base_url": "https://app.example.com", "unexpected": true }"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn from_json_parses_push_mode() {
        let config = SyncConfig::from_json(
            r#"{ "base_url": "https://app.example.com", "push_mode": "stop_on_first_error" }"#,
        )
        .unwrap();
        assert_eq!(config.push_mode, PushMode::StopOnFirstError);
    }

    #[test]
    fn from_lookup_reads_all_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TABLESYNC_BASE_URL", "http://localhost:3000/"),
            ("TABLESYNC_PUSH_MODE", "strict"),
            ("TABLESYNC_MAX_RETRIES", "7"),
            ("TABLESYNC_RETRY_BASE_DELAY_MS", "10"),
            ("TABLESYNC_RETRY_MAX_DELAY_MS", "20"),
            ("TABLESYNC_REQUEST_TIMEOUT_SECS", "5"),
        ]);
        let config =
            SyncConfig::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap();

        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.push_mode, PushMode::StopOnFirstError);
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.retry.max_delay_ms, 20);
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn from_lookup_requires_base_url() {
        assert!(SyncConfig::from_lookup(|_| None).is_err());
    }

    #[test]
    fn from_lookup_rejects_non_numeric_retries() {
        let result = SyncConfig::from_lookup(|key| match key {
            "TABLESYNC_BASE_URL" => Some("https://app.example.com".to_string()),
            "TABLESYNC_MAX_RETRIES" => Some("many".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }
}
