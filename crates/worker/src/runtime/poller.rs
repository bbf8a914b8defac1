//! Poll interval with backoff on claim failures

use std::time::Duration;

use tracing::trace;

/// Tracks the delay before the next claim
///
/// Steady state is the configured interval. Each consecutive claim failure
/// doubles the delay up to `max_backoff`; a successful claim resets it.
#[derive(Debug, Clone)]
pub(crate) struct JobPoller {
    interval: Duration,
    max_backoff: Duration,
    current: Duration,
    consecutive_failures: u32,
}

impl JobPoller {
    pub(crate) fn new(interval: Duration, max_backoff: Duration) -> Self {
        Self {
            interval,
            max_backoff: max_backoff.max(interval),
            current: interval,
            consecutive_failures: 0,
        }
    }

    /// Delay before the next claim
    pub(crate) fn current_interval(&self) -> Duration {
        self.current
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current = self.interval;
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max_backoff);
        trace!(
            interval_ms = self.current.as_millis() as u64,
            failures = self.consecutive_failures,
            "Claim failed, backing off"
        );
    }
}
