//! Retry policy for credential publication.

use std::time::Duration;

use crate::config::PublisherConfig;

/// Exponential backoff, doubling from `initial_backoff` up to `max_backoff`.
///
/// `max_attempts = 1` disables retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retry
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, initial_backoff: Duration::ZERO, max_backoff: Duration::ZERO }
    }

    pub fn from_config(config: &PublisherConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    /// `None` once attempts are exhausted.
    pub fn backoff_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        Some(delay.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.backoff_after(2), Some(Duration::from_millis(1000)));
        assert_eq!(policy.backoff_after(3), None);
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryPolicy::no_retry().backoff_after(1), None);
    }

    #[test]
    fn test_from_config_never_zero_attempts() {
        let config = PublisherConfig { max_attempts: 0, ..Default::default() };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }

    proptest! {
        #[test]
        fn backoff_is_capped_and_monotonic(
            initial_ms in 0u64..5_000,
            max_ms in 0u64..60_000,
            attempts in 1u32..64,
        ) {
            let policy = RetryPolicy {
                max_attempts: attempts,
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(max_ms),
            };
            let mut previous = Duration::ZERO;
            for attempt in 1..attempts {
                let delay = policy.backoff_after(attempt).unwrap();
                prop_assert!(delay <= policy.max_backoff);
                prop_assert!(delay >= previous);
                previous = delay;
            }
            prop_assert!(policy.backoff_after(attempts).is_none());
        }
    }
}
