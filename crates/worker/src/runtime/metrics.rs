//! Worker counters read without locks

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub active_jobs: usize,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Jobs still running when the shutdown timeout elapsed
    pub abandoned: u64,
    pub lease_renewals: u64,
    pub poll_errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct WorkerMetrics {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    lease_renewals: AtomicU64,
    poll_errors: AtomicU64,
}

impl WorkerMetrics {
    pub(crate) fn job_claimed(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn job_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn job_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn jobs_abandoned(&self, count: usize) {
        self.abandoned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn lease_renewed(&self) {
        self.lease_renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn poll_failed(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_jobs: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            active_jobs,
            claimed: self.claimed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            lease_renewals: self.lease_renewals.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}
