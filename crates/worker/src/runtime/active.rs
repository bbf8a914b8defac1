//! Active job tracking

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// A job currently owned by this worker
#[derive(Debug, Clone)]
pub(crate) struct ActiveJob {
    pub(crate) token: CancellationToken,
    pub(crate) started_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: DashMap<String, ActiveJob>,
    count: AtomicUsize,
}

/// Concurrent set of active jobs keyed by job ID
///
/// The count is kept in an atomic so the poll loop can read it without
/// touching the map.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveJobs {
    inner: Arc<Inner>,
}

impl ActiveJobs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a job; `None` if the ID is already active
    ///
    /// The entry is removed when the returned guard drops.
    pub(crate) fn insert(&self, job_id: &str, token: CancellationToken) -> Option<ActiveJobGuard> {
        match self.inner.jobs.entry(job_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(ActiveJob {
                    token,
                    started_at: Instant::now(),
                });
                self.inner.count.fetch_add(1, Ordering::SeqCst);
                Some(ActiveJobGuard {
                    jobs: self.clone(),
                    job_id: job_id.to_string(),
                })
            }
        }
    }

    pub(crate) fn get(&self, job_id: &str) -> Option<ActiveJob> {
        self.inner.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// IDs and running time of the active jobs
    pub(crate) fn snapshot(&self) -> Vec<(String, Duration)> {
        self.inner
            .jobs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().started_at.elapsed()))
            .collect()
    }

    fn remove(&self, job_id: &str) {
        if self.inner.jobs.remove(job_id).is_some() {
            self.inner.count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Removes its job from [`ActiveJobs`] on drop, on every exit path
#[derive(Debug)]
pub(crate) struct ActiveJobGuard {
    jobs: ActiveJobs,
    job_id: String,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.jobs.remove(&self.job_id);
    }
}
