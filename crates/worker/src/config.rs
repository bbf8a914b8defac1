//! Worker runtime configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use jobline_client::duration_millis;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WorkerError};

/// Worker runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name the worker registers under (generated if not provided)
    pub worker_name: String,

    /// Queue to claim jobs from
    pub queue: String,

    /// Maximum jobs executing at once
    pub concurrency: usize,

    /// Delay between claim attempts
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Cap on the poll delay after consecutive claim failures
    #[serde(with = "duration_millis")]
    pub max_poll_backoff: Duration,

    /// Lease requested for each claimed job
    #[serde(with = "duration_millis")]
    pub lease_duration: Duration,

    /// Heartbeats fire every `lease_duration * heartbeat_fraction`
    pub heartbeat_fraction: f64,

    /// Upper bound on waiting for in-flight jobs during `stop()`
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_name: format!("worker-{}", Uuid::now_v7()),
            queue: "default".to_string(),
            concurrency: 10,
            poll_interval: Duration::from_secs(1),
            max_poll_backoff: Duration::from_secs(30),
            lease_duration: Duration::from_secs(30),
            heartbeat_fraction: 0.5,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration for the given queue
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `JOBLINE_QUEUE`: Queue name (default: "default")
    /// - `JOBLINE_CONCURRENCY`: Max concurrent jobs (default: 10)
    /// - `JOBLINE_POLL_INTERVAL_MS`: Poll interval (default: 1000)
    /// - `JOBLINE_LEASE_DURATION_SECS`: Job lease (default: 30)
    /// - `JOBLINE_HEARTBEAT_FRACTION`: Heartbeat interval as a fraction of the lease (default: 0.5)
    /// - `JOBLINE_SHUTDOWN_TIMEOUT_SECS`: Graceful shutdown bound (default: 30)
    /// - `JOBLINE_WORKER_NAME`: Worker name (default: generated)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            worker_name: env_string("JOBLINE_WORKER_NAME").unwrap_or(defaults.worker_name),
            queue: env_string("JOBLINE_QUEUE").unwrap_or(defaults.queue),
            concurrency: env_parse("JOBLINE_CONCURRENCY").unwrap_or(defaults.concurrency),
            poll_interval: env_parse("JOBLINE_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            lease_duration: env_parse("JOBLINE_LEASE_DURATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_duration),
            heartbeat_fraction: env_parse("JOBLINE_HEARTBEAT_FRACTION")
                .unwrap_or(defaults.heartbeat_fraction),
            shutdown_timeout: env_parse("JOBLINE_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            ..defaults
        }
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Set maximum concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_poll_backoff(mut self, backoff: Duration) -> Self {
        self.max_poll_backoff = backoff;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_heartbeat_fraction(mut self, fraction: f64) -> Self {
        self.heartbeat_fraction = fraction;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Heartbeat interval for a lease of the given length
    pub fn heartbeat_interval(&self, lease: Duration) -> Duration {
        lease
            .mul_f64(self.heartbeat_fraction)
            .max(Duration::from_millis(1))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue.trim().is_empty() {
            return Err(WorkerError::InvalidConfig("queue name must not be empty".into()));
        }
        if self.concurrency == 0 {
            return Err(WorkerError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if !(self.heartbeat_fraction > 0.0 && self.heartbeat_fraction < 1.0) {
            return Err(WorkerError::InvalidConfig(format!(
                "heartbeat fraction must be in (0, 1), got {}",
                self.heartbeat_fraction
            )));
        }
        if self.lease_duration.is_zero() {
            return Err(WorkerError::InvalidConfig(
                "lease duration must be greater than zero".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(WorkerError::InvalidConfig(
                "poll interval must be greater than zero".into(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert!(config.worker_name.starts_with("worker-"));
        assert_eq!(config.queue, "default");
        assert_eq!(config.concurrency, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_interval() {
        let config = WorkerConfig::new("emails").with_heartbeat_fraction(0.25);
        assert_eq!(
            config.heartbeat_interval(Duration::from_secs(40)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_validation() {
        assert!(WorkerConfig::new("").validate().is_err());
        assert!(WorkerConfig::new("q").with_concurrency(0).validate().is_err());
        assert!(WorkerConfig::new("q")
            .with_heartbeat_fraction(1.0)
            .validate()
            .is_err());
        assert!(WorkerConfig::new("q")
            .with_heartbeat_fraction(0.0)
            .validate()
            .is_err());
        assert!(WorkerConfig::new("q")
            .with_lease_duration(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = WorkerConfig::new("emails").with_poll_interval(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 250);

        let parsed: WorkerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.poll_interval, Duration::from_millis(250));
    }
}
