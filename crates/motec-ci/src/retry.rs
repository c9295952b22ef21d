//! Retry policy for network-bound steps.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry with exponential backoff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds).
    pub backoff_base_ms: u64,
    /// Upper bound on any single delay (milliseconds).
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    pub fn new(max_retries: u32, backoff_base_ms: u64, backoff_max_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_base_ms,
            backoff_max_ms,
        }
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_runs_once() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = RetryPolicy::new(10, 1_000, 30_000);
        assert_eq!(policy.max_attempts(), 11);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(6), Duration::from_secs(30));
        assert_eq!(policy.delay_after(40), Duration::from_secs(30));
    }
}
