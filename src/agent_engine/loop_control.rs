// Step retry policy.
use std::time::Duration;

use crate::config::AgentConfig;
use crate::errors::DeskZoomError;

/// Bounded retry around a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per step, including the first.
    pub max_attempts: u32,
    /// Base delay; grows linearly with the attempt number.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay * attempt
    }

    /// Whether failed attempt number `attempt` earns another try.
    pub fn should_retry(&self, err: &DeskZoomError, attempt: u32) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_linear_backoff() {
        assert_eq!(policy().delay_for(1), Duration::from_millis(100));
        assert_eq!(policy().delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_attempt_budget() {
        let err = DeskZoomError::MalformedReply("?".into());
        assert!(policy().should_retry(&err, 1));
        assert!(policy().should_retry(&err, 4));
        assert!(!policy().should_retry(&err, 5));
    }

    #[test]
    fn test_fatal_errors_never_retry() {
        assert!(!policy().should_retry(&DeskZoomError::UnknownAction("fly".into()), 1));
    }

    #[test]
    fn test_from_config_floors_attempts() {
        let cfg = AgentConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&cfg).max_attempts, 1);
    }
}
