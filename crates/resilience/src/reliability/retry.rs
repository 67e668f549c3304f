//! Retry policy and executor

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::duration_millis;

/// Classification of failures for retry decisions
///
/// Only transient, transport- or server-class failures should answer `true`.
/// Validation, security and business rejections must answer `false` so they
/// surface on the first attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Configuration for upstream call retries
///
/// # Example
///
/// ```
/// use phonebill_resilience::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(3)
///     .with_initial_interval(Duration::from_secs(2))
///     .with_max_interval(Duration::from_secs(10));
///
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (1.0 for fixed delay)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff used for KOS calls
    ///
    /// - 3 max attempts
    /// - 2 second initial interval
    /// - 10 second max interval
    /// - 2x backoff coefficient
    /// - no jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
            backoff_coefficient: 2.0,
            jitter: 0.0,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.backoff_coefficient.is_nan() || self.backoff_coefficient < 1.0 {
            return Err(ConfigError::invalid(
                "backoff_coefficient",
                "must be at least 1.0",
            ));
        }
        if self.max_interval < self.initial_interval {
            return Err(ConfigError::invalid(
                "max_interval",
                "must not be shorter than initial_interval",
            ));
        }
        Ok(())
    }

    /// Calculate delay for a given attempt number (1-based)
    ///
    /// Returns the duration to wait before that attempt starts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1; // First retry is after attempt 1
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Failure returned by [`RetryExecutor::run`]
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// Every attempt failed with a retryable error
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// An attempt failed with an error that must not be retried
    #[error("{source}")]
    NonRetryable {
        attempt: u32,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The error of the last attempt
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => source,
        }
    }

    /// Borrow the error of the last attempt
    pub fn inner(&self) -> &E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => source,
        }
    }

    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::NonRetryable { attempt, .. } => *attempt,
        }
    }

    /// Whether the failure is the result of running out of attempts
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Runs a unit of work with bounded attempts
///
/// The operation receives the 1-based attempt number. A non-retryable error
/// ends the loop immediately; this is how an opened circuit breaker abandons
/// the remaining attempts.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails non-retryably, or the
    /// policy's attempts are spent
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + Retryable + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => {
                    debug!(attempt, error = %error, "non-retryable failure");
                    return Err(RetryError::NonRetryable {
                        attempt,
                        source: error,
                    });
                }
                Err(error) => {
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, error = %error, "retries exhausted");
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            source: error,
                        });
                    }
                    attempt += 1;
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(
                        next_attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("rejected")]
        Rejected,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Transient)
        }
    }

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_secs(2));
        assert_eq!(policy.max_interval, Duration::from_secs(10));
        assert_eq!(policy.backoff_coefficient, 2.0);
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 3);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let policy = RetryPolicy::exponential().with_max_attempts(6);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::fixed(Duration::from_secs(10), 3).with_jitter(0.1);
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_secs(9));
            assert!(delay <= Duration::from_secs(11));
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::exponential().validate().is_ok());
        assert!(RetryPolicy::exponential()
            .with_max_attempts(0)
            .validate()
            .is_err());
        assert!(RetryPolicy::exponential()
            .with_backoff_coefficient(0.5)
            .validate()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures() {
        let executor = RetryExecutor::new(RetryPolicy::exponential());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = executor
            .run(move |_| async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TestError::Transient)
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(tokio_test::assert_ok!(result), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(Duration::from_secs(1), 3));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = executor
            .run(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            })
            .await;

        let err = tokio_test::assert_err!(result);
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let executor = RetryExecutor::new(RetryPolicy::exponential());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = executor
            .run(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Rejected)
            })
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_exhausted());
        assert!(matches!(err.into_inner(), TestError::Rejected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts() {
        let executor = RetryExecutor::new(RetryPolicy::exponential());
        let started = tokio::time::Instant::now();

        let _: Result<(), _> = executor.run(|_| async { Err(TestError::Transient) }).await;

        // 2s before attempt 2, 4s before attempt 3
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_secs(7));
    }
}
