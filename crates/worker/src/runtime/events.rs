//! Worker lifecycle event hooks

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::error;

use crate::error::JobError;

/// Events emitted by the worker runtime
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Registration succeeded and the loops are running
    Started { worker_id: String },

    /// A claimed job was handed to the handler
    JobStarted {
        job_id: String,
        job_type: String,
        attempt: u32,
    },

    /// The handler returned a result and it was reported
    JobCompleted { job_id: String, duration: Duration },

    /// The handler failed (returned an error or panicked)
    JobFailed {
        job_id: String,
        error: JobError,
        duration: Duration,
    },

    /// A job lease was extended
    LeaseRenewed {
        job_id: String,
        lease_expires_at: Option<DateTime<Utc>>,
    },

    /// `stop()` began draining
    Stopping {
        worker_id: String,
        active_jobs: usize,
    },

    /// The worker deregistered
    Stopped {
        worker_id: String,
        abandoned_jobs: usize,
    },
}

impl WorkerEvent {
    /// Short event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::JobStarted { .. } => "job_started",
            WorkerEvent::JobCompleted { .. } => "job_completed",
            WorkerEvent::JobFailed { .. } => "job_failed",
            WorkerEvent::LeaseRenewed { .. } => "lease_renewed",
            WorkerEvent::Stopping { .. } => "stopping",
            WorkerEvent::Stopped { .. } => "stopped",
        }
    }
}

/// Callback invoked for every [`WorkerEvent`]
pub type EventHook = Arc<dyn Fn(&WorkerEvent) + Send + Sync>;

/// Registered hooks, each invoked inside its own panic boundary
#[derive(Default)]
pub(crate) struct EventHooks {
    hooks: RwLock<Vec<EventHook>>,
}

impl EventHooks {
    pub(crate) fn register(&self, hook: EventHook) {
        self.hooks.write().push(hook);
    }

    /// Deliver `event` to every hook; a panicking hook is logged and skipped
    pub(crate) fn emit(&self, event: &WorkerEvent) {
        let hooks = self.hooks.read().clone();

        for (index, hook) in hooks.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(event))) {
                error!(
                    event = event.name(),
                    hook = index,
                    panic = %panic_message(panic.as_ref()),
                    "Worker event hook panicked"
                );
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
