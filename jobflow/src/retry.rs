//! Retry policy for failed job deliveries.
//!
//! The policy never sleeps inside the worker. [`RetryPolicy::calculate_backoff`]
//! produces a delay hint that the queue transport applies before it
//! redelivers the job.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::JobError;

/// Backoff strategy for retry delays.
///
/// Every strategy is non-decreasing in the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts, including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub backoff_max_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30000,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_backoff_base_ms(mut self, delay: u64) -> Self {
        self.backoff_base_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_backoff_max_ms(mut self, delay: u64) -> Self {
        self.backoff_max_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Returns true if a failed delivery should be attempted again.
    ///
    /// `attempt` is the 1-based number of the delivery that just failed.
    /// Errors whose kind is not retryable (validation, configuration) are
    /// never retried.
    #[must_use]
    pub fn should_retry(&self, error: &JobError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Decides whether a failed terminal-failure hook may redeliver the job.
    ///
    /// Hooks get as many extra deliveries as the job itself had, so the
    /// total stays bounded at twice `max_attempts`.
    #[must_use]
    pub fn should_retry_hook(&self, error: &JobError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts.saturating_mul(2)
    }

    /// Calculates the redelivery delay hint after the given attempt.
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_ms;
        let max = self.backoff_max_ms;

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        Duration::from_millis(delay)
    }

    /// Makes a retry decision for a failed delivery.
    #[must_use]
    pub fn decide(&self, error: &JobError, attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            RetryDecision::NotRetryable
        } else if self.should_retry(error, attempt) {
            RetryDecision::Retry(self.calculate_backoff(attempt))
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver after the specified delay.
    Retry(Duration),
    /// Attempts are exhausted.
    GiveUp,
    /// The error kind is never retried.
    NotRetryable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_strategy_default() {
        assert_eq!(BackoffStrategy::default(), BackoffStrategy::Exponential);
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_base_ms, 1000);
        assert_eq!(policy.backoff_max_ms, 30000);
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_backoff_base_ms(500)
            .with_backoff_max_ms(10000)
            .with_backoff(BackoffStrategy::Linear);

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_base_ms, 500);
        assert_eq!(policy.backoff_strategy, BackoffStrategy::Linear);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new().with_backoff_base_ms(100);

        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant_backoff() {
        let linear = RetryPolicy::new()
            .with_backoff_base_ms(100)
            .with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.calculate_backoff(2), Duration::from_millis(300));

        let constant = RetryPolicy::new()
            .with_backoff_base_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.calculate_backoff(5), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_backoff_base_ms(1000)
            .with_backoff_max_ms(5000);

        assert_eq!(policy.calculate_backoff(10), Duration::from_millis(5000));
        assert_eq!(policy.calculate_backoff(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        for strategy in [
            BackoffStrategy::Exponential,
            BackoffStrategy::Linear,
            BackoffStrategy::Constant,
        ] {
            let policy = RetryPolicy::new()
                .with_backoff_base_ms(250)
                .with_backoff_max_ms(60_000)
                .with_backoff(strategy);

            for attempt in 0..70 {
                let current = policy.calculate_backoff(attempt);
                let next = policy.calculate_backoff(attempt + 1);
                assert!(next >= current, "{strategy:?} decreased at attempt {attempt}");
                assert!(next <= Duration::from_millis(60_000));
            }
        }
    }

    #[test]
    fn test_validation_never_retried() {
        let policy = RetryPolicy::new().with_max_attempts(10);
        let err = JobError::validation("missing noteId");

        for attempt in 0..20 {
            assert!(!policy.should_retry(&err, attempt));
        }
        assert_eq!(policy.decide(&err, 1), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_hook_retries_bounded() {
        let policy = RetryPolicy::new().with_max_attempts(3);
        let err = JobError::external_service("queue unavailable");

        assert!(policy.should_retry_hook(&err, 3));
        assert!(policy.should_retry_hook(&err, 5));
        assert!(!policy.should_retry_hook(&err, 6));
        assert!(!policy.should_retry_hook(&err, 1000));
        assert!(!policy.should_retry_hook(&JobError::validation("bad"), 3));
    }

    #[test]
    fn test_unknown_retried_until_cap() {
        let policy = RetryPolicy::new().with_max_attempts(3).with_backoff_base_ms(10);
        let err = JobError::unknown("db down");

        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&err, 3));

        assert_eq!(policy.decide(&err, 1), RetryDecision::Retry(Duration::from_millis(20)));
        assert_eq!(policy.decide(&err, 3), RetryDecision::GiveUp);
    }
}
