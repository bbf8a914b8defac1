//! Client configuration
//!
//! Loaded from environment variables or built programmatically.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{CredentialRefresher, Credentials};
use crate::error::{ClientError, Result};
use crate::reliability::{duration_millis, CircuitBreakerConfig, RetryPolicy};

/// Configuration consumed by [`Transport::from_config`](crate::Transport::from_config)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the queue API (e.g. `https://queue.example.com/v1`)
    pub base_url: String,

    /// Initial credential material
    #[serde(default)]
    pub credentials: Credentials,

    /// Retry behaviour for every request
    pub retry: RetryPolicy,

    /// Circuit breaker settings; `None` disables the breaker
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Default per-attempt timeout
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,

    /// Refresh the access token before requests when it is about to expire
    pub auto_refresh: bool,

    /// How long before expiry a proactive refresh happens
    #[serde(with = "duration_millis")]
    pub refresh_margin: Duration,

    /// Bound on 401 -> refresh -> re-issue cycles per logical request
    pub max_auth_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            credentials: Credentials::default(),
            retry: RetryPolicy::default(),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            request_timeout: Duration::from_secs(30),
            auto_refresh: true,
            refresh_margin: CredentialRefresher::DEFAULT_SAFETY_MARGIN,
            max_auth_retries: 1,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given base URL with defaults elsewhere
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `JOBLINE_BASE_URL`: API base URL (default: http://localhost:8080)
    /// - `JOBLINE_API_KEY`: Long-lived API key
    /// - `JOBLINE_ACCESS_TOKEN` / `JOBLINE_REFRESH_TOKEN`: Token pair
    /// - `JOBLINE_MAX_RETRIES`: Retries after the first attempt (default: 3)
    /// - `JOBLINE_RETRY_BASE_DELAY_MS` / `JOBLINE_RETRY_MAX_DELAY_MS`: Backoff bounds
    /// - `JOBLINE_RETRY_FACTOR`: Backoff multiplier (default: 2.0)
    /// - `JOBLINE_RETRY_JITTER`: Enable jitter (default: true)
    /// - `JOBLINE_BREAKER_ENABLED`: Enable the circuit breaker (default: true)
    /// - `JOBLINE_BREAKER_FAILURE_THRESHOLD` / `JOBLINE_BREAKER_SUCCESS_THRESHOLD`
    /// - `JOBLINE_BREAKER_OPEN_TIMEOUT_MS`: Open -> half-open delay
    /// - `JOBLINE_REQUEST_TIMEOUT_MS`: Per-attempt timeout (default: 30000)
    /// - `JOBLINE_MAX_AUTH_RETRIES`: Refresh-and-retry rounds on 401 (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let credentials = Credentials {
            api_key: env_string("JOBLINE_API_KEY"),
            access_token: env_string("JOBLINE_ACCESS_TOKEN"),
            refresh_token: env_string("JOBLINE_REFRESH_TOKEN"),
            expires_at: None,
        };

        let mut retry = defaults.retry.clone();
        if let Some(max_retries) = env_parse("JOBLINE_MAX_RETRIES") {
            retry.max_retries = max_retries;
        }
        if let Some(ms) = env_parse("JOBLINE_RETRY_BASE_DELAY_MS") {
            retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("JOBLINE_RETRY_MAX_DELAY_MS") {
            retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = env_parse("JOBLINE_RETRY_FACTOR") {
            retry.factor = factor;
        }
        if let Some(jitter) = env_bool("JOBLINE_RETRY_JITTER") {
            retry.jitter = jitter;
        }

        let circuit_breaker = if env_bool("JOBLINE_BREAKER_ENABLED").unwrap_or(true) {
            let mut breaker = CircuitBreakerConfig::default();
            if let Some(threshold) = env_parse("JOBLINE_BREAKER_FAILURE_THRESHOLD") {
                breaker = breaker.with_failure_threshold(threshold);
            }
            if let Some(threshold) = env_parse("JOBLINE_BREAKER_SUCCESS_THRESHOLD") {
                breaker = breaker.with_success_threshold(threshold);
            }
            if let Some(ms) = env_parse("JOBLINE_BREAKER_OPEN_TIMEOUT_MS") {
                breaker = breaker.with_open_timeout(Duration::from_millis(ms));
            }
            Some(breaker)
        } else {
            None
        };

        Self {
            base_url: env_string("JOBLINE_BASE_URL").unwrap_or(defaults.base_url),
            credentials,
            retry,
            circuit_breaker,
            request_timeout: env_parse("JOBLINE_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            max_auth_retries: env_parse("JOBLINE_MAX_AUTH_RETRIES")
                .unwrap_or(defaults.max_auth_retries),
            ..defaults
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Option<CircuitBreakerConfig>) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Bound the 401 -> refresh -> retry rounds of one logical request
    pub fn with_max_auth_retries(mut self, max: u32) -> Self {
        self.max_auth_retries = max;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Configuration("base URL must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::Configuration(format!(
                "base URL must be http(s): {}",
                self.base_url
            )));
        }
        self.retry.validate().map_err(ClientError::Configuration)?;
        if self.request_timeout.is_zero() {
            return Err(ClientError::Configuration(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.circuit_breaker.is_some());
        assert_eq!(config.max_auth_retries, 1);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("ftp://queue").validate().is_err());

        let bad_retry = ClientConfig::new("http://queue").with_retry_policy(
            RetryPolicy::exponential()
                .with_base_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(1)),
        );
        assert!(bad_retry.validate().is_err());

        let zero_timeout = ClientConfig::new("http://queue").with_request_timeout(Duration::ZERO);
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = ClientConfig::new("https://queue.example.com")
            .with_credentials(Credentials::api_key("key"))
            .with_circuit_breaker(None);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.base_url, config.base_url);
        assert_eq!(parsed.credentials, config.credentials);
        assert!(parsed.circuit_breaker.is_none());
        assert_eq!(parsed.request_timeout, config.request_timeout);
    }
}
