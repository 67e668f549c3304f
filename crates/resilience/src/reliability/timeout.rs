//! Call duration limits
//!
//! A [`TimeLimiter`] races a future against a deadline. When the deadline
//! wins the future is dropped, which cancels the in-flight transport call
//! (reqwest aborts the request when its future is dropped).

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::ConfigError;
use crate::duration_millis;

/// Timeout-related errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeoutError {
    /// Call exceeded its time limit and was cancelled
    #[error("call timed out (limit {limit:?})")]
    Elapsed { limit: Duration },
}

/// Timeout configuration for an upstream integration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Time allowed to establish the connection
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Time allowed to read the response
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    /// Total time a single call may take
    pub fn call_timeout(&self) -> Duration {
        self.connect_timeout + self.read_timeout
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "connect_timeout",
                "must be greater than zero",
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "read_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Enforces a ceiling on a single call's duration
#[derive(Debug, Clone, Copy)]
pub struct TimeLimiter {
    limit: Duration,
}

impl TimeLimiter {
    /// Create a limiter with a fixed limit
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    /// Create a limiter allowing connect plus read time
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self::new(config.call_timeout())
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Run `call`, cancelling it if it exceeds the limit
    pub async fn bound<F, T>(&self, call: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(self.limit, call).await {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(limit_ms = self.limit.as_millis() as u64, "call timed out, cancelled");
                Err(TimeoutError::Elapsed { limit: self.limit })
            }
        }
    }
}
