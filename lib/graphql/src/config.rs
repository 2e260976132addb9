//! Client configuration.
//!
//! Loaded via the `config` crate from `UMSATZIO__*` environment variables,
//! e.g. `UMSATZIO__MAX_RETRIES=4`. Every field has a default.

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Timeouts, retry budget and token handling for [`GraphqlClient`](crate::GraphqlClient).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Per-attempt HTTP timeout, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retries after the first attempt for 429 and connection failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling after HTTP 429, in milliseconds.
    #[serde(default = "default_rate_limit_max_backoff_ms")]
    pub rate_limit_max_backoff_ms: u64,

    /// Backoff ceiling after connection failures, in milliseconds.
    #[serde(default = "default_connection_max_backoff_ms")]
    pub connection_max_backoff_ms: u64,

    /// Upper bound on a server-provided `Retry-After`, in seconds.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,

    /// Access tokens expiring within this many seconds are renewed first.
    #[serde(default = "default_token_expiry_skew_secs")]
    pub token_expiry_skew_secs: u64,
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    400
}

fn default_rate_limit_max_backoff_ms() -> u64 {
    5_000
}

fn default_connection_max_backoff_ms() -> u64 {
    2_000
}

fn default_max_retry_after_secs() -> u64 {
    60
}

fn default_token_expiry_skew_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            rate_limit_max_backoff_ms: default_rate_limit_max_backoff_ms(),
            connection_max_backoff_ms: default_connection_max_backoff_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
            token_expiry_skew_secs: default_token_expiry_skew_secs(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `UMSATZIO__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("UMSATZIO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn token_expiry_skew(&self) -> Duration {
        Duration::from_secs(self.token_expiry_skew_secs)
    }

    /// Builds the retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            rate_limit_max_delay: Duration::from_millis(self.rate_limit_max_backoff_ms),
            connection_max_delay: Duration::from_millis(self.connection_max_backoff_ms),
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
        }
    }
}
