//! Queue backend abstraction
//!
//! The runtime talks to the remote queue only through [`QueueBackend`]. Two
//! implementations ship with the crate:
//! - [`HttpQueueBackend`]: the job-lifecycle endpoints over the resilient transport
//! - [`InMemoryQueueBackend`]: a local queue for tests and development

mod http;
mod memory;

pub use http::HttpQueueBackend;
pub use memory::{BackendCalls, InMemoryQueueBackend};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobline_client::Result;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// A job claimed from the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,

    pub queue: String,

    /// Handler-defined job type (e.g. "send_email")
    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    /// Current attempt number (1-based)
    #[serde(default = "default_attempt")]
    pub attempt: u32,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// When the lease granted by the claim expires
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_attempt() -> u32 {
    1
}

/// Registration sent when the worker starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub name: String,
    pub queue: String,
    pub concurrency: usize,
    pub lease_duration_secs: u64,
    #[serde(default)]
    pub version: Option<String>,
}

/// Identity and lease parameters assigned by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredWorker {
    pub worker_id: String,

    /// Lease the service grants per job; overrides the configured one
    #[serde(default)]
    pub lease_duration_secs: Option<u64>,
}

impl RegisteredWorker {
    /// Effective lease, falling back to `requested`
    pub fn lease_duration(&self, requested: Duration) -> Duration {
        self.lease_duration_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(requested)
    }
}

/// Parameters of one claim call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub queue: String,
    /// Maximum number of jobs to lease
    pub limit: usize,
    pub lease_duration_secs: u64,
}

/// Result of a lease renewal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaseRenewal {
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// The service asked the worker to stop working on this job
    #[serde(default)]
    pub cancel_requested: bool,
}

/// Progress update for a running job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Completion percentage, 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JobProgress {
    pub fn percent(percent: f64) -> Self {
        Self {
            percent: Some(percent.clamp(0.0, 100.0)),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Failure report for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    #[serde(default)]
    pub error_type: Option<String>,
    pub retryable: bool,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl From<JobError> for JobFailure {
    fn from(err: JobError) -> Self {
        Self {
            message: err.message,
            error_type: err.error_type,
            retryable: err.retryable,
            details: err.details,
        }
    }
}

/// Liveness report sent by the worker heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLoad {
    pub active_jobs: usize,
    pub concurrency: usize,
    pub accepting: bool,
}

/// Remote job-queue operations consumed by the worker runtime
///
/// Every method maps to one logical remote call. Implementations return
/// [`ClientError`](jobline_client::ClientError) so callers can branch on
/// the error taxonomy (e.g. a lost lease surfaces as `NotFound` or
/// `Conflict`).
#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    /// Register a worker and obtain its identity
    async fn register_worker(&self, registration: &WorkerRegistration)
        -> Result<RegisteredWorker>;

    /// Lease up to `request.limit` jobs
    async fn claim_jobs(&self, request: &ClaimRequest) -> Result<Vec<Job>>;

    /// Extend the lease on a job held by `worker_id`
    async fn renew_lease(
        &self,
        worker_id: &str,
        job_id: &str,
        lease: Duration,
    ) -> Result<LeaseRenewal>;

    async fn update_progress(
        &self,
        worker_id: &str,
        job_id: &str,
        progress: &JobProgress,
    ) -> Result<()>;

    async fn complete_job(
        &self,
        worker_id: &str,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<()>;

    async fn fail_job(&self, worker_id: &str, job_id: &str, failure: &JobFailure) -> Result<()>;

    /// Report worker liveness and load
    async fn worker_heartbeat(&self, worker_id: &str, load: &WorkerLoad) -> Result<()>;

    async fn deregister_worker(&self, worker_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_deserializes_with_defaults() {
        let job: Job = serde_json::from_value(serde_json::json!({
            "id": "job-1",
            "queue": "emails",
            "type": "send_email",
            "payload": {"to": "a@example.com"}
        }))
        .unwrap();

        assert_eq!(job.job_type, "send_email");
        assert_eq!(job.attempt, 1);
        assert!(job.metadata.is_empty());
        assert!(job.lease_expires_at.is_none());
    }

    #[test]
    fn test_registered_lease_overrides_requested() {
        let requested = Duration::from_secs(30);
        let worker = RegisteredWorker {
            worker_id: "w".into(),
            lease_duration_secs: Some(60),
        };
        assert_eq!(worker.lease_duration(requested), Duration::from_secs(60));

        let worker = RegisteredWorker {
            worker_id: "w".into(),
            lease_duration_secs: Some(0),
        };
        assert_eq!(worker.lease_duration(requested), requested);
    }

    #[test]
    fn test_progress_percent_is_clamped() {
        assert_eq!(JobProgress::percent(140.0).percent, Some(100.0));
        let progress = JobProgress::percent(50.0).with_message("half");
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json, serde_json::json!({"percent": 50.0, "message": "half"}));
    }

    #[test]
    fn test_failure_from_job_error() {
        let failure: JobFailure = JobError::non_retryable("boom").with_type("panic").into();
        assert_eq!(failure.message, "boom");
        assert_eq!(failure.error_type.as_deref(), Some("panic"));
        assert!(!failure.retryable);
    }
}
