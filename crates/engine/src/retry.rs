//! Backoff for work that lost a registry latch wait
//!
//! A transaction attempt (or a direct registry mutation) that waits longer
//! than `lock_wait` for a latch fails with `Conflict`. Nothing was applied,
//! so the whole attempt can run again from a fresh context. Every other
//! failure is final: validation errors, routine errors and timeouts would
//! fail the same way on a second run.
//!
//! Delays double from `base_delay` per retry, capped at `max_delay`.

use std::time::Duration;
use tally_core::TallyError;

/// When and how long to wait before re-running a conflicted attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 makes the first conflict final
    pub max_retries: usize,
    /// Wait before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the given bounds
    pub fn new(max_retries: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// First conflict is final
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before re-running after `error`, given the retries already made
    ///
    /// None when the error is not a latch conflict or the budget is spent.
    pub fn retry_after(&self, error: &TallyError, retries_made: usize) -> Option<Duration> {
        if error.is_conflict() && retries_made < self.max_retries {
            Some(self.backoff(retries_made))
        } else {
            None
        }
    }

    /// Wait before retry number `retry` (0-based)
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31) as u32).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> TallyError {
        TallyError::Conflict {
            reason: "latch on org.example.Account held too long".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(100));
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
        assert_eq!(policy.backoff(4), Duration::from_millis(100));
        assert_eq!(policy.backoff(200), Duration::from_millis(100));
    }

    #[test]
    fn test_only_conflicts_are_retried() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(4));
        assert_eq!(policy.retry_after(&conflict(), 0), Some(Duration::from_millis(1)));
        assert_eq!(policy.retry_after(&conflict(), 1), Some(Duration::from_millis(2)));
        assert_eq!(policy.retry_after(&conflict(), 2), None);
        assert_eq!(policy.retry_after(&TallyError::domain("insufficient funds"), 0), None);
    }

    #[test]
    fn test_none_makes_first_conflict_final() {
        assert_eq!(RetryPolicy::none().retry_after(&conflict(), 0), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_backoff_monotonic_and_capped(
            base in 0u64..1000,
            max in 0u64..10_000,
            retry in 0usize..128,
        ) {
            let policy = RetryPolicy::new(
                retry + 1,
                Duration::from_millis(base),
                Duration::from_millis(max),
            );
            let delay = policy.backoff(retry);
            proptest::prop_assert!(delay <= Duration::from_millis(max));
            proptest::prop_assert!(delay <= policy.backoff(retry + 1));
        }
    }
}
