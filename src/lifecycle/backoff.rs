//! Retry backoff between load attempts

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::error::FailureKind;

/// Linear backoff, stretched for out-of-memory failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub oom_multiplier: u32,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            oom_multiplier: 3,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Wait after the `attempt`-th consecutive failure (1-based)
    pub fn delay(&self, attempt: u32, kind: FailureKind) -> Duration {
        let factor = match kind {
            FailureKind::OutOfMemory => attempt.saturating_mul(self.oom_multiplier.max(1)),
            _ => attempt,
        };
        self.base.saturating_mul(factor)
    }

    /// Another attempt is allowed after `failures` consecutive failures
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1, FailureKind::Download), Duration::from_secs(5));
        assert_eq!(policy.delay(2, FailureKind::Format), Duration::from_secs(10));
        assert_eq!(policy.delay(3, FailureKind::Unknown), Duration::from_secs(15));
    }

    #[test]
    fn test_oom_delay_is_multiplied() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1, FailureKind::OutOfMemory), Duration::from_secs(15));
        assert_eq!(policy.delay(2, FailureKind::OutOfMemory), Duration::from_secs(30));

        let no_multiplier = BackoffPolicy {
            oom_multiplier: 0,
            ..BackoffPolicy::default()
        };
        assert_eq!(no_multiplier.delay(2, FailureKind::OutOfMemory), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_budget() {
        let policy = BackoffPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
