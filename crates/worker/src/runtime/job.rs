//! Supervised execution of one claimed job

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use jobline_client::ErrorKind;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument};

use super::active::ActiveJobGuard;
use super::events::{panic_message, WorkerEvent};
use super::{JobContext, RuntimeInner, Session};
use crate::backend::{Job, JobFailure};
use crate::error::JobError;

/// Run a job to completion and report its outcome
///
/// A lease-renewal task runs alongside the handler and is torn down as
/// soon as the handler returns. The guard removes the job from the active
/// set when this future finishes or is dropped.
pub(super) async fn run_job(
    inner: Arc<RuntimeInner>,
    session: Arc<Session>,
    job: Job,
    token: CancellationToken,
    _guard: ActiveJobGuard,
) {
    let job = Arc::new(job);
    let started = Instant::now();

    debug!("Job started");
    inner.events.emit(&WorkerEvent::JobStarted {
        job_id: job.id.clone(),
        job_type: job.job_type.clone(),
        attempt: job.attempt,
    });

    let renewal_stop = CancellationToken::new();
    let _renewal_guard = renewal_stop.clone().drop_guard();
    let renewal = tokio::spawn(renew_leases(
        Arc::clone(&inner),
        Arc::clone(&session),
        Arc::clone(&job),
        token.clone(),
        renewal_stop.clone(),
    )
    .in_current_span());

    let ctx = JobContext::new(
        Arc::clone(&job),
        Arc::clone(&session.worker_id),
        token,
        Arc::clone(&inner.backend),
    );
    let handler = Arc::clone(&inner.handler);
    let execution = AssertUnwindSafe(async move { handler.handle(ctx).await }).catch_unwind();

    let outcome = tokio::select! {
        outcome = execution => outcome,
        _ = inner.abandon.cancelled() => {
            warn!("Job abandoned at shutdown timeout");
            return;
        }
    };

    renewal_stop.cancel();
    if let Err(e) = renewal.await {
        error!(error = %e, "Lease renewal task failed");
    }

    let duration = started.elapsed();
    let error = match outcome {
        Ok(Ok(result)) => {
            inner.metrics.job_completed();
            match inner
                .backend
                .complete_job(&session.worker_id, &job.id, &result)
                .await
            {
                Ok(()) => info!(duration_ms = duration.as_millis() as u64, "Job completed"),
                Err(e) => error!(error = %e, "Failed to report job completion"),
            }
            inner.events.emit(&WorkerEvent::JobCompleted {
                job_id: job.id.clone(),
                duration,
            });
            return;
        }
        Ok(Err(error)) => error,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "Job handler panicked");
            JobError::non_retryable(format!("handler panicked: {message}")).with_type("panic")
        }
    };

    inner.metrics.job_failed();
    warn!(
        error = %error,
        retryable = error.retryable,
        duration_ms = duration.as_millis() as u64,
        "Job failed"
    );
    let failure = JobFailure::from(error.clone());
    if let Err(e) = inner
        .backend
        .fail_job(&session.worker_id, &job.id, &failure)
        .await
    {
        error!(error = %e, "Failed to report job failure");
    }
    inner.events.emit(&WorkerEvent::JobFailed {
        job_id: job.id.clone(),
        error,
        duration,
    });
}

/// Renew the job lease every heartbeat interval until `stop` fires
///
/// A renewal that reports `cancel_requested`, or fails because the lease is
/// gone, cancels the job's token.
async fn renew_leases(
    inner: Arc<RuntimeInner>,
    session: Arc<Session>,
    job: Arc<Job>,
    token: CancellationToken,
    stop: CancellationToken,
) {
    let every = session.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = inner.backend.renew_lease(&session.worker_id, &job.id, session.lease) => result,
        };

        match result {
            Ok(renewal) => {
                inner.metrics.lease_renewed();
                trace!(lease_expires_at = ?renewal.lease_expires_at, "Lease renewed");
                inner.events.emit(&WorkerEvent::LeaseRenewed {
                    job_id: job.id.clone(),
                    lease_expires_at: renewal.lease_expires_at,
                });
                if renewal.cancel_requested && !token.is_cancelled() {
                    info!("Queue service requested cancellation");
                    token.cancel();
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Conflict) => {
                warn!(error = %e, "Job lease lost, cancelling job");
                token.cancel();
                break;
            }
            Err(e) => warn!(error = %e, "Lease renewal failed"),
        }
    }

    trace!("Lease renewal stopped");
}
