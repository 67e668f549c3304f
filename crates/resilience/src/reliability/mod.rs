//! Reliability patterns for upstream calls
//!
//! This module provides:
//! - [`CircuitBreaker`] - Count-based call admission with CAS state updates
//! - [`CircuitBreakerRegistry`] - One shared breaker per upstream name
//! - [`RetryExecutor`] - Bounded retries driven by a [`RetryPolicy`]
//! - [`TimeLimiter`] - Call duration ceiling with cancellation

mod circuit_breaker;
mod registry;
mod retry;
mod timeout;

pub use circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerMetrics, CircuitBreakerPermit, CircuitState,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use timeout::{TimeLimiter, TimeoutConfig, TimeoutError};
