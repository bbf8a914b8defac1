//! In-memory queue backend for testing and local development

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jobline_client::{ApiError, ClientError, Result};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    ClaimRequest, Job, JobFailure, JobProgress, LeaseRenewal, QueueBackend, RegisteredWorker,
    WorkerLoad, WorkerRegistration,
};

/// Per-operation call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCalls {
    pub register: usize,
    pub claim: usize,
    pub renew_lease: usize,
    pub progress: usize,
    pub complete: usize,
    pub fail: usize,
    pub worker_heartbeat: usize,
    pub deregister: usize,
}

struct Lease {
    worker_id: String,
    renewals: usize,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    leased: HashMap<String, Lease>,
    completed: HashMap<String, serde_json::Value>,
    failed: HashMap<String, JobFailure>,
    progress: HashMap<String, Vec<JobProgress>>,
    workers: HashMap<String, WorkerRegistration>,
    cancel_requested: HashSet<String>,
    max_in_flight: usize,
    calls: BackendCalls,
}

/// In-memory implementation of [`QueueBackend`]
///
/// Holds a single FIFO of pending jobs (the queue name in claims is not
/// used for routing) and records every call so tests can assert on them.
/// Leases never expire on their own.
///
/// # Example
///
/// ```
/// use jobline_worker::InMemoryQueueBackend;
///
/// let backend = InMemoryQueueBackend::new();
/// let job_id = backend.enqueue("send_email", serde_json::json!({"to": "a@example.com"}));
/// assert_eq!(backend.pending_count(), 1);
/// # let _ = job_id;
/// ```
#[derive(Default)]
pub struct InMemoryQueueBackend {
    state: Mutex<QueueState>,
    reject_registration: AtomicBool,
    claim_failures: AtomicUsize,
    claim_delay: Mutex<Option<Duration>>,
}

impl InMemoryQueueBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job to the tail of the queue, returning its ID
    pub fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> String {
        let id = Uuid::now_v7().to_string();
        self.enqueue_job(Job {
            id: id.clone(),
            queue: "default".to_string(),
            job_type: job_type.to_string(),
            payload,
            attempt: 0,
            max_attempts: None,
            lease_expires_at: None,
            created_at: Some(Utc::now()),
            metadata: HashMap::new(),
        });
        id
    }

    /// Add a fully specified job to the tail of the queue
    pub fn enqueue_job(&self, job: Job) {
        self.state.lock().pending.push_back(job);
    }

    /// Flag a job so its next lease renewal reports `cancel_requested`
    pub fn request_cancel(&self, job_id: &str) {
        self.state.lock().cancel_requested.insert(job_id.to_string());
    }

    /// Make every registration fail with a server error
    pub fn reject_registration(&self, reject: bool) {
        self.reject_registration.store(reject, Ordering::SeqCst);
    }

    /// Make the next `count` claim calls fail with a server error
    pub fn fail_next_claims(&self, count: usize) {
        self.claim_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every claim call
    pub fn set_claim_delay(&self, delay: Option<Duration>) {
        *self.claim_delay.lock() = delay;
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Jobs leased and not yet completed or failed
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().leased.len()
    }

    /// Highest number of simultaneously leased jobs seen
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn completed_count(&self) -> usize {
        self.state.lock().completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.state.lock().failed.len()
    }

    /// Result reported for a completed job
    pub fn result(&self, job_id: &str) -> Option<serde_json::Value> {
        self.state.lock().completed.get(job_id).cloned()
    }

    /// Failure reported for a failed job
    pub fn failure(&self, job_id: &str) -> Option<JobFailure> {
        self.state.lock().failed.get(job_id).cloned()
    }

    /// Progress updates reported for a job, oldest first
    pub fn progress(&self, job_id: &str) -> Vec<JobProgress> {
        self.state
            .lock()
            .progress
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Lease renewals recorded for a currently leased job
    pub fn lease_renewals(&self, job_id: &str) -> usize {
        self.state
            .lock()
            .leased
            .get(job_id)
            .map(|lease| lease.renewals)
            .unwrap_or(0)
    }

    /// Currently registered worker IDs
    pub fn registered_workers(&self) -> Vec<String> {
        self.state.lock().workers.keys().cloned().collect()
    }

    pub fn calls(&self) -> BackendCalls {
        self.state.lock().calls
    }

    /// Remove the lease held by `worker_id` on `job_id`
    fn release(state: &mut QueueState, worker_id: &str, job_id: &str) -> Result<()> {
        match state.leased.get(job_id) {
            Some(lease) if lease.worker_id == worker_id => {
                state.leased.remove(job_id);
                Ok(())
            }
            Some(_) => Err(conflict(job_id)),
            None => Err(not_found(job_id)),
        }
    }
}

fn not_found(job_id: &str) -> ClientError {
    ClientError::NotFound(ApiError::from_body(
        404,
        format!("job {job_id} is not leased").as_bytes(),
    ))
}

fn conflict(job_id: &str) -> ClientError {
    ClientError::Conflict(ApiError::from_body(
        409,
        format!("job {job_id} is leased by another worker").as_bytes(),
    ))
}

fn unavailable(message: &str) -> ClientError {
    ClientError::Server(ApiError::from_body(503, message.as_bytes()))
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn register_worker(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<RegisteredWorker> {
        let mut state = self.state.lock();
        state.calls.register += 1;

        if self.reject_registration.load(Ordering::SeqCst) {
            return Err(unavailable("registration unavailable"));
        }

        let worker_id = format!("{}-{}", registration.name, Uuid::now_v7());
        state.workers.insert(worker_id.clone(), registration.clone());

        Ok(RegisteredWorker {
            worker_id,
            lease_duration_secs: None,
        })
    }

    async fn claim_jobs(&self, request: &ClaimRequest) -> Result<Vec<Job>> {
        let delay = *self.claim_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.calls.claim += 1;

        let failures = self.claim_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.claim_failures.store(failures - 1, Ordering::SeqCst);
            return Err(unavailable("claim unavailable"));
        }

        let lease_expires_at =
            Utc::now() + ChronoDuration::seconds(request.lease_duration_secs as i64);
        let take = request.limit.min(state.pending.len());
        let mut jobs = Vec::with_capacity(take);

        for mut job in state.pending.drain(..take).collect::<Vec<_>>() {
            job.attempt += 1;
            job.lease_expires_at = Some(lease_expires_at);
            state.leased.insert(
                job.id.clone(),
                Lease {
                    worker_id: request.worker_id.clone(),
                    renewals: 0,
                },
            );
            jobs.push(job);
        }

        state.max_in_flight = state.max_in_flight.max(state.leased.len());
        Ok(jobs)
    }

    async fn renew_lease(
        &self,
        worker_id: &str,
        job_id: &str,
        lease: Duration,
    ) -> Result<LeaseRenewal> {
        let mut state = self.state.lock();
        state.calls.renew_lease += 1;

        let cancel_requested = state.cancel_requested.contains(job_id);
        match state.leased.get_mut(job_id) {
            Some(held) if held.worker_id == worker_id => {
                held.renewals += 1;
                let lease = ChronoDuration::from_std(lease).unwrap_or(ChronoDuration::zero());
                Ok(LeaseRenewal {
                    lease_expires_at: Some(Utc::now() + lease),
                    cancel_requested,
                })
            }
            Some(_) => Err(conflict(job_id)),
            None => Err(not_found(job_id)),
        }
    }

    async fn update_progress(
        &self,
        _worker_id: &str,
        job_id: &str,
        progress: &JobProgress,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.progress += 1;

        if !state.leased.contains_key(job_id) {
            return Err(not_found(job_id));
        }
        state
            .progress
            .entry(job_id.to_string())
            .or_default()
            .push(progress.clone());
        Ok(())
    }

    async fn complete_job(
        &self,
        worker_id: &str,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.complete += 1;

        Self::release(&mut state, worker_id, job_id)?;
        state.completed.insert(job_id.to_string(), result.clone());
        Ok(())
    }

    async fn fail_job(&self, worker_id: &str, job_id: &str, failure: &JobFailure) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.fail += 1;

        Self::release(&mut state, worker_id, job_id)?;
        state.failed.insert(job_id.to_string(), failure.clone());
        Ok(())
    }

    async fn worker_heartbeat(&self, worker_id: &str, _load: &WorkerLoad) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.worker_heartbeat += 1;

        if !state.workers.contains_key(worker_id) {
            return Err(ClientError::NotFound(ApiError::from_body(
                404,
                b"worker not registered",
            )));
        }
        Ok(())
    }

    async fn deregister_worker(&self, worker_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.deregister += 1;
        state.workers.remove(worker_id);
        Ok(())
    }
}
