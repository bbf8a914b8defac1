//! Job execution context

use std::collections::HashMap;
use std::sync::Arc;

use jobline_client::ClientError;
use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::backend::{Job, JobProgress, QueueBackend};
use crate::error::JobError;

/// Context handed to a [`JobHandler`](super::JobHandler) for one job
///
/// The context provides:
/// - The claimed job and its metadata
/// - Progress reporting to the queue service
/// - Cancellation detection (worker shutdown, lost lease, or a cancel
///   requested by the service)
///
/// # Example
///
/// ```ignore
/// async fn handle(&self, ctx: JobContext) -> JobResult {
///     let batch: Batch = ctx.payload_as()?;
///     for (i, item) in batch.items.iter().enumerate() {
///         if ctx.is_cancelled() {
///             return Err(JobError::retryable("cancelled"));
///         }
///         process(item).await?;
///         ctx.report_progress(JobProgress::percent(pct(i, batch.items.len()))).await?;
///     }
///     Ok(json!({"processed": batch.items.len()}))
/// }
/// ```
#[derive(Clone)]
pub struct JobContext {
    job: Arc<Job>,
    worker_id: Arc<str>,
    cancel: CancellationToken,
    backend: Arc<dyn QueueBackend>,
}

impl JobContext {
    pub(crate) fn new(
        job: Arc<Job>,
        worker_id: Arc<str>,
        cancel: CancellationToken,
        backend: Arc<dyn QueueBackend>,
    ) -> Self {
        Self {
            job,
            worker_id,
            cancel,
            backend,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub fn job_type(&self) -> &str {
        &self.job.job_type
    }

    /// Current attempt number (1-based)
    pub fn attempt(&self) -> u32 {
        self.job.attempt
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.job.metadata
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.job.payload
    }

    /// Decode the payload; a mismatch is a non-retryable `invalid_payload`
    /// error
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(T::deserialize(&self.job.payload)?)
    }

    /// Report progress to the queue service
    pub async fn report_progress(&self, progress: JobProgress) -> Result<(), ClientError> {
        self.backend
            .update_progress(&self.worker_id, &self.job.id, &progress)
            .await
    }

    /// Whether the job has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the job is asked to stop
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Token that fires when the job is asked to stop
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job.id)
            .field("job_type", &self.job.job_type)
            .field("attempt", &self.job.attempt)
            .field("worker_id", &self.worker_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
