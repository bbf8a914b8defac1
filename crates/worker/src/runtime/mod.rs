//! Polling worker runtime
//!
//! This module provides:
//! - [`WorkerRuntime`] - Registers, claims jobs under a concurrency budget,
//!   renews leases and drains gracefully on stop
//! - [`JobHandler`] / [`JobContext`] - The user-facing job API
//! - [`WorkerEvent`] - Lifecycle hooks
//!
//! ```text
//! start() ─► register ─┬─► poll loop ──► claim ≤ (limit - active) ──► run_job (per job)
//!                      │                                              ├─ lease renewal ticker
//!                      │                                              ├─ handler
//!                      │                                              └─ complete / fail
//!                      └─► worker heartbeat loop
//!
//! stop() ─► cancel loops + jobs ─► drain (≤ shutdown timeout) ─► deregister
//! ```

mod active;
mod context;
mod events;
mod handler;
mod job;
mod metrics;
mod poller;
mod state;

pub use context::JobContext;
pub use events::{EventHook, WorkerEvent};
pub use handler::{handler_fn, FnHandler, JobHandler, JobResult};
pub use metrics::MetricsSnapshot;
pub use state::LifecycleState;

use std::sync::Arc;
use std::time::Duration;

use jobline_client::ClientError;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

use self::active::ActiveJobs;
use self::events::EventHooks;
use self::metrics::WorkerMetrics;
use self::poller::JobPoller;
use self::state::StateCell;
use crate::backend::{ClaimRequest, Job, QueueBackend, WorkerLoad, WorkerRegistration};
use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};

/// Identity and lease parameters fixed at registration
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) worker_id: Arc<str>,
    pub(crate) lease: Duration,
    pub(crate) heartbeat_interval: Duration,
}

/// State shared between the runtime handle, its loops and its jobs
pub(crate) struct RuntimeInner {
    pub(crate) config: WorkerConfig,
    pub(crate) backend: Arc<dyn QueueBackend>,
    pub(crate) handler: Arc<dyn JobHandler>,
    state: StateCell,
    session: RwLock<Option<Arc<Session>>>,
    active: ActiveJobs,
    pub(crate) metrics: WorkerMetrics,
    pub(crate) events: EventHooks,
    /// Child of the parent token; fires on `stop()` or parent cancellation
    shutdown: CancellationToken,
    /// Fires when the shutdown timeout elapses with jobs still running
    pub(crate) abandon: CancellationToken,
    tracker: TaskTracker,
}

/// Worker runtime executing jobs from a remote queue
///
/// # Example
///
/// ```ignore
/// use jobline_worker::prelude::*;
///
/// let backend = Arc::new(HttpQueueBackend::from_config(&ClientConfig::from_env())?);
/// let runtime = WorkerRuntime::new(
///     backend,
///     handler_fn(|ctx: JobContext| async move { Ok(ctx.payload().clone()) }),
///     WorkerConfig::from_env(),
/// );
///
/// runtime.start().await?;
/// // ... later, graceful shutdown
/// runtime.stop().await?;
/// ```
pub struct WorkerRuntime {
    inner: Arc<RuntimeInner>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerRuntime {
    /// Create a runtime with its own root cancellation scope
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        handler: impl JobHandler,
        config: WorkerConfig,
    ) -> Self {
        Self::with_parent(backend, handler, config, &CancellationToken::new())
    }

    /// Create a runtime whose loops and jobs are cancelled with `parent`
    pub fn with_parent(
        backend: Arc<dyn QueueBackend>,
        handler: impl JobHandler,
        config: WorkerConfig,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                backend,
                handler: Arc::new(handler),
                state: StateCell::new(),
                session: RwLock::new(None),
                active: ActiveJobs::new(),
                metrics: WorkerMetrics::default(),
                events: EventHooks::default(),
                shutdown: parent.child_token(),
                abandon: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback for worker events
    ///
    /// Hooks run inline on the worker's tasks; a panicking hook is logged
    /// and does not affect other hooks or the runtime.
    pub fn on_event<F>(&self, hook: F)
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.inner.events.register(Arc::new(hook));
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    /// Worker ID assigned at registration
    pub fn worker_id(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|session| session.worker_id.to_string())
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Number of jobs currently executing
    pub fn active_jobs(&self) -> usize {
        self.inner.active.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.active.len())
    }

    /// Request cooperative cancellation of one active job
    ///
    /// Returns `false` if the job is not active on this worker.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        match self.inner.active.get(job_id) {
            Some(job) => {
                info!(job_id, "Cancelling job");
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Register with the queue service and start polling
    ///
    /// A registration failure moves the runtime to [`LifecycleState::Error`].
    #[instrument(skip(self), fields(queue = %self.inner.config.queue))]
    pub async fn start(&self) -> Result<()> {
        let config = &self.inner.config;
        config.validate()?;

        self.inner
            .state
            .transition(LifecycleState::Idle, LifecycleState::Starting)
            .map_err(WorkerError::AlreadyStarted)?;

        info!(
            worker_name = %config.worker_name,
            concurrency = config.concurrency,
            "Starting worker"
        );

        let registration = WorkerRegistration {
            name: config.worker_name.clone(),
            queue: config.queue.clone(),
            concurrency: config.concurrency,
            lease_duration_secs: config.lease_duration.as_secs().max(1),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        };

        let registered = tokio::select! {
            result = self.inner.backend.register_worker(&registration) => result,
            _ = self.inner.shutdown.cancelled() => Err(ClientError::Cancelled),
        };
        let registered = match registered {
            Ok(registered) => registered,
            Err(e) => {
                error!(error = %e, "Worker registration failed");
                let _ = self
                    .inner
                    .state
                    .transition(LifecycleState::Starting, LifecycleState::Error);
                return Err(WorkerError::RegistrationFailed(e));
            }
        };

        let lease = registered.lease_duration(config.lease_duration);
        let session = Arc::new(Session {
            worker_id: Arc::from(registered.worker_id.as_str()),
            lease,
            heartbeat_interval: config.heartbeat_interval(lease),
        });
        *self.inner.session.write() = Some(Arc::clone(&session));

        self.inner
            .state
            .transition(LifecycleState::Starting, LifecycleState::Running)
            .map_err(WorkerError::AlreadyStarted)?;

        let span = info_span!("worker", worker_id = %session.worker_id);
        let poll = tokio::spawn(
            poll_loop(Arc::clone(&self.inner), Arc::clone(&session)).instrument(span.clone()),
        );
        let heartbeat = tokio::spawn(
            heartbeat_loop(Arc::clone(&self.inner), Arc::clone(&session)).instrument(span),
        );
        *self.loops.lock() = vec![poll, heartbeat];

        info!(
            worker_id = %session.worker_id,
            lease_ms = lease.as_millis() as u64,
            heartbeat_ms = session.heartbeat_interval.as_millis() as u64,
            "Worker started"
        );
        self.inner.events.emit(&WorkerEvent::Started {
            worker_id: session.worker_id.to_string(),
        });

        Ok(())
    }

    /// Drain in-flight jobs and deregister
    ///
    /// No-op unless the runtime is `Running`; a call that races an ongoing
    /// stop waits for it to reach `Stopped`. Jobs still executing after
    /// the shutdown timeout are abandoned; their leases expire server-side.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        if let Err(state) = self
            .inner
            .state
            .transition(LifecycleState::Running, LifecycleState::Stopping)
        {
            if state == LifecycleState::Stopping {
                debug!("Stop already in progress, waiting for it to finish");
                self.inner.state.wait_until(LifecycleState::is_terminal).await;
            } else {
                debug!(%state, "Stop ignored, worker is not running");
            }
            return Ok(());
        }

        let session = self.inner.session.read().clone();
        let worker_id = session
            .as_ref()
            .map(|s| s.worker_id.to_string())
            .unwrap_or_default();
        let active = self.inner.active.len();

        info!(%worker_id, active_jobs = active, "Stopping worker");
        self.inner.events.emit(&WorkerEvent::Stopping {
            worker_id: worker_id.clone(),
            active_jobs: active,
        });

        self.inner.shutdown.cancel();

        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker loop task failed");
            }
        }

        self.inner.tracker.close();
        let timeout = self.inner.config.shutdown_timeout;
        let abandoned = match tokio::time::timeout(timeout, self.inner.tracker.wait()).await {
            Ok(()) => 0,
            Err(_) => {
                let remaining = self.inner.active.snapshot();
                for (job_id, running) in &remaining {
                    warn!(
                        %job_id,
                        running_ms = running.as_millis() as u64,
                        "Abandoning job still running after shutdown timeout"
                    );
                }
                self.inner.abandon.cancel();
                self.inner.metrics.jobs_abandoned(remaining.len());
                remaining.len()
            }
        };

        let deregistered = match &session {
            Some(session) => self.inner.backend.deregister_worker(&session.worker_id).await,
            None => Ok(()),
        };

        let _ = self
            .inner
            .state
            .transition(LifecycleState::Stopping, LifecycleState::Stopped);
        self.inner.events.emit(&WorkerEvent::Stopped {
            worker_id: worker_id.clone(),
            abandoned_jobs: abandoned,
        });

        match deregistered {
            Ok(()) => {
                info!(%worker_id, abandoned_jobs = abandoned, "Worker stopped");
                Ok(())
            }
            Err(e) => {
                warn!(%worker_id, error = %e, "Failed to deregister worker");
                Err(WorkerError::Backend(e))
            }
        }
    }

    /// Start, run until the parent token is cancelled or `stop()` is
    /// called elsewhere, then stop
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        self.inner.shutdown.cancelled().await;
        self.stop().await
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("state", &self.state())
            .field("worker_id", &self.worker_id())
            .field("queue", &self.inner.config.queue)
            .field("active_jobs", &self.active_jobs())
            .finish()
    }
}

/// Claim jobs up to spare capacity each tick
async fn poll_loop(inner: Arc<RuntimeInner>, session: Arc<Session>) {
    let mut poller = JobPoller::new(inner.config.poll_interval, inner.config.max_poll_backoff);

    loop {
        let capacity = inner
            .config
            .concurrency
            .saturating_sub(inner.active.len());

        if capacity == 0 {
            trace!("At capacity, skipping claim");
        } else {
            let request = ClaimRequest {
                worker_id: session.worker_id.to_string(),
                queue: inner.config.queue.clone(),
                limit: capacity,
                lease_duration_secs: session.lease.as_secs().max(1),
            };

            let claimed = tokio::select! {
                result = inner.backend.claim_jobs(&request) => result,
                _ = inner.shutdown.cancelled() => break,
            };

            match claimed {
                Ok(jobs) => {
                    poller.record_success();
                    if !jobs.is_empty() {
                        debug!(count = jobs.len(), capacity, "Claimed jobs");
                    }
                    dispatch(&inner, &session, jobs, capacity);
                }
                Err(e) => {
                    poller.record_failure();
                    inner.metrics.poll_failed();
                    warn!(
                        error = %e,
                        failures = poller.consecutive_failures(),
                        retry_in_ms = poller.current_interval().as_millis() as u64,
                        "Failed to claim jobs"
                    );
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poller.current_interval()) => {}
            _ = inner.shutdown.cancelled() => break,
        }
    }

    debug!("Poll loop exited");
}

/// Hand claimed jobs to the tracker, one task per job
fn dispatch(inner: &Arc<RuntimeInner>, session: &Arc<Session>, mut jobs: Vec<Job>, capacity: usize) {
    if jobs.len() > capacity {
        warn!(
            claimed = jobs.len(),
            capacity, "Queue returned more jobs than requested, ignoring the excess"
        );
        jobs.truncate(capacity);
    }

    for job in jobs {
        let token = inner.shutdown.child_token();
        let Some(guard) = inner.active.insert(&job.id, token.clone()) else {
            warn!(job_id = %job.id, "Job is already active, skipping duplicate claim");
            continue;
        };

        inner.metrics.job_claimed();
        let span = info_span!(
            "job",
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempt
        );
        inner.tracker.spawn(
            job::run_job(Arc::clone(inner), Arc::clone(session), job, token, guard)
                .instrument(span),
        );
    }
}

/// Report liveness and load every heartbeat interval
async fn heartbeat_loop(inner: Arc<RuntimeInner>, session: Arc<Session>) {
    let every = session.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.shutdown.cancelled() => break,
        }

        let load = WorkerLoad {
            active_jobs: inner.active.len(),
            concurrency: inner.config.concurrency,
            accepting: true,
        };

        let result = tokio::select! {
            result = inner.backend.worker_heartbeat(&session.worker_id, &load) => result,
            _ = inner.shutdown.cancelled() => break,
        };

        match result {
            Ok(()) => trace!(active_jobs = load.active_jobs, "Worker heartbeat sent"),
            Err(e) => warn!(error = %e, "Worker heartbeat failed"),
        }
    }

    debug!("Heartbeat loop exited");
}
