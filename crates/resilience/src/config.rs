// Resilience configuration
//
// One immutable value built at startup, validated once, and shared by
// reference with every component constructor.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::{CircuitBreakerConfig, RetryPolicy, TimeoutConfig};
use crate::worker::WriteQueueConfig;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// A required value is absent
    #[error("missing configuration: {0}")]
    Missing(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Everything the resilience layer needs, in one place
///
/// # Example
///
/// ```
/// use phonebill_resilience::ResilienceConfig;
///
/// let config = ResilienceConfig::default();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.circuit_breaker.sliding_window_size, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub timeout: TimeoutConfig,
    pub history_queue: WriteQueueConfig,

    /// Upper bound on concurrent upstream calls
    pub max_concurrent_calls: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            timeout: TimeoutConfig::default(),
            history_queue: WriteQueueConfig::default(),
            max_concurrent_calls: 64,
        }
    }
}

impl ResilienceConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables (defaults in parentheses):
    /// - `CB_FAILURE_RATE_THRESHOLD` (0.5), `CB_SLOW_CALL_RATE_THRESHOLD` (0.5)
    /// - `CB_SLOW_CALL_DURATION_MS` (10000), `CB_SLIDING_WINDOW_SIZE` (10)
    /// - `CB_MINIMUM_NUMBER_OF_CALLS` (5), `CB_PERMITTED_CALLS_IN_HALF_OPEN` (3)
    /// - `CB_WAIT_DURATION_IN_OPEN_MS` (60000)
    /// - `RETRY_MAX_ATTEMPTS` (3), `RETRY_INITIAL_INTERVAL_MS` (2000)
    /// - `RETRY_MAX_INTERVAL_MS` (10000), `RETRY_BACKOFF_MULTIPLIER` (2.0)
    /// - `KOS_CONNECT_TIMEOUT_MS` (5000), `KOS_READ_TIMEOUT_MS` (30000)
    /// - `HISTORY_QUEUE_CAPACITY` (1024), `HISTORY_QUEUE_WORKERS` (4)
    /// - `HISTORY_QUEUE_MAX_ATTEMPTS` (3), `KOS_MAX_CONCURRENT_CALLS` (64)
    ///
    /// Unparseable values fall back to the default; the result is validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key);
        let millis = |key: &str, default: Duration| {
            parse(get(key)).map(Duration::from_millis).unwrap_or(default)
        };

        let cb = &defaults.circuit_breaker;
        let circuit_breaker = CircuitBreakerConfig {
            failure_rate_threshold: parse(get("CB_FAILURE_RATE_THRESHOLD"))
                .unwrap_or(cb.failure_rate_threshold),
            slow_call_rate_threshold: parse(get("CB_SLOW_CALL_RATE_THRESHOLD"))
                .unwrap_or(cb.slow_call_rate_threshold),
            slow_call_duration_threshold: millis(
                "CB_SLOW_CALL_DURATION_MS",
                cb.slow_call_duration_threshold,
            ),
            sliding_window_size: parse(get("CB_SLIDING_WINDOW_SIZE"))
                .unwrap_or(cb.sliding_window_size),
            minimum_number_of_calls: parse(get("CB_MINIMUM_NUMBER_OF_CALLS"))
                .unwrap_or(cb.minimum_number_of_calls),
            permitted_calls_in_half_open_state: parse(get("CB_PERMITTED_CALLS_IN_HALF_OPEN"))
                .unwrap_or(cb.permitted_calls_in_half_open_state),
            wait_duration_in_open_state: millis(
                "CB_WAIT_DURATION_IN_OPEN_MS",
                cb.wait_duration_in_open_state,
            ),
        };

        let retry = RetryPolicy {
            max_attempts: parse(get("RETRY_MAX_ATTEMPTS")).unwrap_or(defaults.retry.max_attempts),
            initial_interval: millis("RETRY_INITIAL_INTERVAL_MS", defaults.retry.initial_interval),
            max_interval: millis("RETRY_MAX_INTERVAL_MS", defaults.retry.max_interval),
            backoff_coefficient: parse(get("RETRY_BACKOFF_MULTIPLIER"))
                .unwrap_or(defaults.retry.backoff_coefficient),
            ..defaults.retry.clone()
        };

        let timeout = TimeoutConfig::new(
            millis("KOS_CONNECT_TIMEOUT_MS", defaults.timeout.connect_timeout),
            millis("KOS_READ_TIMEOUT_MS", defaults.timeout.read_timeout),
        );

        let history_queue = WriteQueueConfig {
            capacity: parse(get("HISTORY_QUEUE_CAPACITY"))
                .unwrap_or(defaults.history_queue.capacity),
            workers: parse(get("HISTORY_QUEUE_WORKERS")).unwrap_or(defaults.history_queue.workers),
            max_attempts: parse(get("HISTORY_QUEUE_MAX_ATTEMPTS"))
                .unwrap_or(defaults.history_queue.max_attempts),
            ..defaults.history_queue.clone()
        };

        let config = Self {
            circuit_breaker,
            retry,
            timeout,
            history_queue,
            max_concurrent_calls: parse(get("KOS_MAX_CONCURRENT_CALLS"))
                .unwrap_or(defaults.max_concurrent_calls),
        };
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.timeout.validate()?;
        self.history_queue.validate()?;
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_calls",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = ResilienceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ResilienceConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_interval, Duration::from_secs(2));
        assert_eq!(config.timeout.call_timeout(), Duration::from_secs(35));
        assert_eq!(config.history_queue.capacity, 1024);
    }

    #[test]
    fn test_overrides() {
        let config = ResilienceConfig::from_lookup(lookup(&[
            ("CB_FAILURE_RATE_THRESHOLD", "0.25"),
            ("CB_SLIDING_WINDOW_SIZE", "20"),
            ("CB_WAIT_DURATION_IN_OPEN_MS", "1500"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("KOS_READ_TIMEOUT_MS", "1000"),
            ("HISTORY_QUEUE_WORKERS", "2"),
            ("KOS_MAX_CONCURRENT_CALLS", "8"),
        ]))
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_rate_threshold, 0.25);
        assert_eq!(config.circuit_breaker.sliding_window_size, 20);
        assert_eq!(
            config.circuit_breaker.wait_duration_in_open_state,
            Duration::from_millis(1500)
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.timeout.read_timeout, Duration::from_secs(1));
        assert_eq!(config.history_queue.workers, 2);
        assert_eq!(config.max_concurrent_calls, 8);
    }

    #[test]
    fn test_unparseable_value_falls_back() {
        let config =
            ResilienceConfig::from_lookup(lookup(&[("RETRY_MAX_ATTEMPTS", "many")])).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let cases: &[(&str, &str)] = &[
            ("CB_FAILURE_RATE_THRESHOLD", "1.5"),
            ("CB_SLIDING_WINDOW_SIZE", "0"),
            ("CB_MINIMUM_NUMBER_OF_CALLS", "50"),
            ("CB_PERMITTED_CALLS_IN_HALF_OPEN", "0"),
            ("RETRY_MAX_ATTEMPTS", "0"),
            ("KOS_CONNECT_TIMEOUT_MS", "0"),
            ("HISTORY_QUEUE_CAPACITY", "0"),
            ("KOS_MAX_CONCURRENT_CALLS", "0"),
        ];
        for (key, value) in cases {
            let result = ResilienceConfig::from_lookup(lookup(&[(key, value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { .. })),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::invalid("sliding_window_size", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid sliding_window_size: must be at least 1"
        );
    }
}
