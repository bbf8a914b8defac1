//! Retry policy implementation

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::duration_millis;

/// Configuration for request retries
///
/// Exponential backoff capped at `max_delay`, optionally scaled by a jitter
/// multiplier drawn uniformly from `[0.5, 1.5)` to avoid thundering herd.
///
/// # Example
///
/// ```
/// use jobline_client::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_retries(5)
///     .with_base_delay(Duration::from_secs(1))
///     .with_max_delay(Duration::from_secs(60));
///
/// // First retry after ~1 second
/// // Second retry after ~2 seconds
/// // Third retry after ~4 seconds
/// // etc.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub factor: f64,

    /// Whether to scale each delay by a random factor in `[0.5, 1.5)`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy with sensible defaults
    ///
    /// - 3 retries
    /// - 500ms base delay
    /// - 30 second max delay
    /// - 2x factor
    /// - jitter enabled
    pub fn exponential() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: true,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::exponential()
        }
    }

    /// Create a policy with fixed intervals (no backoff, no jitter)
    pub fn fixed(interval: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: interval,
            max_delay: interval,
            factor: 1.0,
            jitter: false,
        }
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff factor (clamped to >= 1.0)
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check the construction invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("retry base delay must be greater than zero".into());
        }
        if self.max_delay < self.base_delay {
            return Err("retry max delay must be at least the base delay".into());
        }
        if !(self.factor >= 1.0) {
            return Err("retry factor must be at least 1.0".into());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based: `delay(0)` precedes the
    /// first retry)
    ///
    /// `min(base_delay * factor^attempt, max_delay)`, scaled by jitter when
    /// enabled. Uses the thread-local RNG so concurrent callers never share
    /// generator state.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };

        // Jitter on a near-maximal cap can overflow a Duration
        Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Check if another retry is allowed after the given 0-based attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Total physical attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.factor, 2.0);
        assert!(policy.jitter);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5), 3);

        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_max_delay_does_not_overflow() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::MAX)
            .with_jitter(true);

        for attempt in [0, 10, 64, 1000, u32::MAX] {
            let delay = policy.delay(attempt);
            assert!(delay <= Duration::MAX);
        }
        assert_eq!(policy.clone().with_jitter(false).delay(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_delay_growth() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_secs(1))
            .with_jitter(false);

        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false);

        assert_eq!(policy.delay(10), Duration::from_secs(5));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10));

        for attempt in 0..5 {
            let expected = 0.1 * 2f64.powi(attempt as i32);
            for _ in 0..50 {
                let delay = policy.delay(attempt).as_secs_f64();
                assert!(delay >= expected * 0.5 - 1e-9, "{delay} below bound");
                assert!(delay <= expected * 1.5 + 1e-9, "{delay} above bound");
            }
        }
    }

    #[test]
    fn test_jitter_varies() {
        let policy = RetryPolicy::exponential().with_base_delay(Duration::from_secs(1));

        let samples: Vec<Duration> = (0..20).map(|_| policy.delay(1)).collect();
        assert!(samples.iter().any(|d| *d != samples[0]));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::exponential().with_max_retries(2);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_validate() {
        let zero = RetryPolicy::exponential().with_base_delay(Duration::ZERO);
        assert!(zero.validate().is_err());

        let inverted = RetryPolicy::exponential()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential().with_max_retries(10);

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
