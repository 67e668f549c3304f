//! # Phonebill Resilience
//!
//! Building blocks for calling an unreliable upstream without letting its
//! failures cascade into the callers.
//!
//! ## Features
//!
//! - **Circuit breakers**: count-based sliding window, lock-free state swaps, named registry
//! - **Retries**: fixed or exponential backoff, only for errors classified as retryable
//! - **Time limits**: overrunning calls are cancelled, not abandoned
//! - **Cache-aside store**: per-category TTLs, in-memory or Redis backend
//! - **Operation tracking**: durable lifecycle records with optimistic locking
//! - **Background writes**: bounded queue with drop or backpressure on overflow
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CircuitBreakerRegistry                      │
//! │  (one CircuitBreaker per upstream operation name)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ allow() / record()
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            RetryExecutor ──► TimeLimiter ──► call            │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────┐        ┌──────────────────────────────┐
//! │      CacheStore       │        │    AsyncOperationTracker     │
//! │  (CacheBackend: mem,  │        │  (OperationStore: mem, PG)   │
//! │   redis)              │        │  terminal writes via         │
//! └──────────────────────┘        │  WriteQueue                  │
//!                                  └──────────────────────────────┘
//! ```
//!
//! Nothing here knows about a particular upstream; integrations compose
//! these pieces.

pub mod cache;
pub mod config;
pub mod duration_millis;
pub mod persistence;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cache::{CacheBackend, CacheCategory, CacheKey, CacheStore};
    pub use crate::config::{ConfigError, ResilienceConfig};
    pub use crate::persistence::{
        AsyncOperation, AsyncOperationTracker, OperationStatus, OperationStore, TrackerError,
    };
    pub use crate::reliability::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
        RetryError, RetryExecutor, RetryPolicy, Retryable, TimeLimiter,
    };
    pub use crate::worker::{BackgroundTask, WriteQueue};
}

// Re-export key types at crate root
pub use cache::{CacheCategory, CacheKey, CacheStats, CacheStore, InMemoryCacheBackend};
pub use config::{ConfigError, ResilienceConfig};
pub use persistence::{
    AsyncOperation, AsyncOperationTracker, InMemoryOperationStore, OperationStatus,
    OperationStore, PostgresOperationStore, TerminalOutcome, TerminalWrite, TrackerError,
    TransitionDetail,
};
pub use reliability::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics,
    CircuitBreakerRegistry, CircuitState, RetryError, RetryExecutor, RetryPolicy, Retryable,
    TimeLimiter, TimeoutConfig, TimeoutError,
};
pub use worker::{BackgroundTask, WriteQueue, WriteQueueConfig};
