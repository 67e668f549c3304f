//! CacheBackend trait definition

use std::time::Duration;

use async_trait::async_trait;

/// Error type for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Backend could not be reached
    #[error("cache connection error: {0}")]
    Connection(String),

    /// Stored value could not be encoded or decoded
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Key/value store with per-key TTL
///
/// Values are opaque strings; typing happens in
/// [`CacheStore`](super::CacheStore).
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Get a live value
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value, replacing any previous one (last write wins)
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remove one key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `prefix`; returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    /// Remove every key starting with `prefix` and ending with `suffix`
    async fn delete_matching(&self, prefix: &str, suffix: &str) -> Result<usize, CacheError>;

    /// Remove every key owned by this cache; returns how many were removed
    async fn clear(&self) -> Result<usize, CacheError>;
}
