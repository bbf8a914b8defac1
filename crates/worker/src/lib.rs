//! # Jobline Worker
//!
//! Turns a remote job queue into a locally managed pool of concurrently
//! executing jobs.
//!
//! ## Features
//!
//! - **Bounded concurrency**: never holds more jobs than the configured limit
//! - **Lease supervision**: renews each job's lease while its handler runs
//! - **Graceful shutdown**: drains in-flight jobs within a bounded timeout
//! - **Panic isolation**: handler and event-hook panics never take down the worker
//!
//! ## Example
//!
//! ```ignore
//! use jobline_worker::prelude::*;
//!
//! let backend = Arc::new(HttpQueueBackend::from_config(&ClientConfig::from_env())?);
//! let runtime = WorkerRuntime::new(
//!     backend,
//!     handler_fn(|ctx: JobContext| async move {
//!         ctx.report_progress(JobProgress::percent(100.0)).await?;
//!         Ok(json!({"echo": ctx.payload()}))
//!     }),
//!     WorkerConfig::new("emails").with_concurrency(4),
//! );
//!
//! runtime.run().await?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod runtime;
pub mod telemetry;

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{
        HttpQueueBackend, InMemoryQueueBackend, Job, JobFailure, JobProgress, QueueBackend,
    };
    pub use crate::config::WorkerConfig;
    pub use crate::error::{JobError, WorkerError};
    pub use crate::runtime::{
        handler_fn, JobContext, JobHandler, JobResult, LifecycleState, MetricsSnapshot,
        WorkerEvent, WorkerRuntime,
    };
    pub use jobline_client::ClientConfig;
}

// Re-export key types at crate root
pub use backend::{HttpQueueBackend, InMemoryQueueBackend, Job, JobProgress, QueueBackend};
pub use config::WorkerConfig;
pub use error::{JobError, Result, WorkerError};
pub use runtime::{
    handler_fn, JobContext, JobHandler, JobResult, LifecycleState, MetricsSnapshot, WorkerEvent,
    WorkerRuntime,
};
