//! In-memory implementation of CacheBackend

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;

use super::backend::{CacheBackend, CacheError};

/// A stored cache value
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub ttl: Duration,
    pub inserted_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(key: &str, value: &str, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
            inserted_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    /// Whether the TTL has run out
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before expiry
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// In-memory cache backend
///
/// Expired entries are dropped lazily on read; [`purge_expired`] removes the
/// rest. Suitable for tests and single-instance deployments.
///
/// [`purge_expired`]: InMemoryCacheBackend::purge_expired
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a live entry
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.clone())
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        // Read guard is released; drop the expired entry unless it was just replaced
        self.entries.remove_if(key, |_, e| e.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(key, value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn delete_matching(&self, prefix: &str, suffix: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries
            .retain(|k, _| !(k.starts_with(prefix) && k[prefix.len()..].ends_with(suffix)));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let count = self.entries.len();
        self.entries.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("k", "v", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let backend = InMemoryCacheBackend::new();
        backend.set("a", "1", Duration::from_secs(1)).await.unwrap();
        backend.set("b", "2", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_prefix_and_clear() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        backend.set("bill:data:1:2025-01", "x", ttl).await.unwrap();
        backend.set("bill:data:1:2025-02", "x", ttl).await.unwrap();
        backend.set("bill:data:2:2025-01", "x", ttl).await.unwrap();

        assert_eq!(backend.delete_prefix("bill:data:1:").await.unwrap(), 2);
        assert!(backend.delete("bill:data:2:2025-01").await.unwrap());
        assert!(!backend.delete("bill:data:2:2025-01").await.unwrap());

        backend.set("x", "y", ttl).await.unwrap();
        assert_eq!(backend.clear().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_matching_prefix_and_suffix() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        backend.set("bill:data:1:2025-01", "x", ttl).await.unwrap();
        backend.set("bill:data:2:2025-01", "x", ttl).await.unwrap();
        backend.set("bill:data:2:2025-02", "x", ttl).await.unwrap();
        backend.set("bill:months:2025-01", "x", ttl).await.unwrap();

        let removed = backend
            .delete_matching("bill:data:", ":2025-01")
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_metadata() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("k", "v", Duration::from_secs(3600))
            .await
            .unwrap();
        let entry = backend.entry("k").expect("entry");
        assert_eq!(entry.key, "k");
        assert_eq!(entry.ttl, Duration::from_secs(3600));
        assert!(entry.remaining_ttl() <= Duration::from_secs(3600));
    }
}
