//! Retry eligibility and backoff
//!
//! Pure decision logic. The caller owns the loop and the sleep, so backoff
//! only ever blocks the unit of work that is retrying.

use searchkeeper_core::config::RetryConfig;
use searchkeeper_core::Error;
use std::time::Duration;

/// Retry policy for one import call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration, jitter_fraction: f64) -> Self {
        Self {
            attempts,
            base_delay,
            max_delay,
            jitter_fraction: jitter_fraction.clamp(0.0, 1.0),
        }
    }

    /// Total attempts allowed, including the first
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether `error`, raised by attempt number `attempt` (1-based), may be retried
    pub fn retryable(&self, attempt: u32, error: &Error) -> bool {
        attempt < self.attempts && error.is_retryable_kind()
    }

    /// Jittered delay to wait after attempt number `attempt` fails
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, fastrand::f64() * 2.0 - 1.0)
    }

    /// Delay with an explicit jitter sample in `[-1, 1]`
    pub fn next_delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let backoff = self.backoff(attempt).as_secs_f64();
        let jittered = backoff + backoff * self.jitter_fraction * unit.clamp(-1.0, 1.0);
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// `min(base * 2^(attempt - 1), max)` without jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.attempts,
            config.base_delay(),
            config.max_delay(),
            config.jitter_fraction,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(5), jitter)
    }

    #[test]
    fn test_backoff_without_jitter() {
        let policy = policy(0.0);
        assert_eq!(policy.next_delay(1), Duration::from_millis(500));
        assert_eq!(policy.next_delay(2), Duration::from_secs(1));
        assert_eq!(policy.next_delay(3), Duration::from_secs(2));
        assert_eq!(policy.next_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_last_attempt_is_never_retryable() {
        let policy = policy(0.0);
        let transient = Error::connection("reset");
        assert!(policy.retryable(1, &transient));
        assert!(policy.retryable(2, &transient));
        assert!(!policy.retryable(3, &transient));
        assert!(!policy.retryable(4, &transient));
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        let policy = policy(0.0);
        assert!(!policy.retryable(1, &Error::api(400, "bad")));
        assert!(!policy.retryable(1, &Error::validation("no id")));
        assert!(!policy.retryable(1, &Error::PayloadTooLarge { bytes: 1 }));
        assert!(policy.retryable(1, &Error::api(429, "slow down")));
        assert!(policy.retryable(1, &Error::api(502, "bad gateway")));
    }

    fn assert_close(actual: Duration, expected_ms: u64) {
        let diff = actual.as_secs_f64() - Duration::from_millis(expected_ms).as_secs_f64();
        assert!(diff.abs() < 1e-6, "{actual:?} != {expected_ms}ms");
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy(0.2);
        assert_close(policy.next_delay_with(1, 1.0), 600);
        assert_close(policy.next_delay_with(1, -1.0), 400);

        for _ in 0..100 {
            let delay = policy.next_delay(2);
            let secs = delay.as_secs_f64();
            assert!((0.8 - 1e-6..=1.2 + 1e-6).contains(&secs), "{delay:?}");
        }
    }

    #[test]
    fn test_delay_floored_at_zero() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 1.0);
        assert_eq!(policy.next_delay_with(1, -1.0), Duration::ZERO);
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 400,
            jitter_fraction: 0.0,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.attempts(), 5);
        assert_close(policy.next_delay(4), 400);
    }
}
