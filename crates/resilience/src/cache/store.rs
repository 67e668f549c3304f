//! Typed cache-aside store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::CacheBackend;
use super::category::{CacheCategory, CacheKey};

/// Hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// Cache-aside store with per-category TTLs
///
/// Cache trouble never fails a request: backend errors are logged and
/// reported as a miss (on read) or as "not stored" (on write). Null values
/// are never stored, so a failed or empty fetch is always retried upstream.
///
/// Concurrent misses on the same key are not coalesced; each caller goes to
/// the source of truth independently.
///
/// # Example
///
/// ```ignore
/// let key = CacheKey::new(CacheCategory::BillData, [line, month]);
/// if let Some(bill) = cache.get::<BillInfo>(&key).await {
///     return Ok(bill);
/// }
/// let bill = fetch_bill().await?;
/// cache.put(&key, &bill).await;
/// ```
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    ttl_overrides: HashMap<CacheCategory, Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            ttl_overrides: HashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Override the TTL of one category
    pub fn with_ttl(mut self, category: CacheCategory, ttl: Duration) -> Self {
        self.ttl_overrides.insert(category, ttl);
        self
    }

    /// TTL applied to entries of `category`
    pub fn ttl_for(&self, category: CacheCategory) -> Duration {
        self.ttl_overrides
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_ttl())
    }

    /// Look up a value
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = match self.backend.get(key.as_str()).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        };

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache miss");
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cache entry, evicting");
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.evict(key).await;
                None
            }
        }
    }

    /// Store a value with its category's TTL
    ///
    /// Returns whether the value was stored.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> bool {
        self.put_with_ttl(key, value, self.ttl_for(key.category()))
            .await
    }

    /// Store a value with an explicit TTL
    pub async fn put_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let json = match serde_json::to_value(value) {
            Ok(serde_json::Value::Null) => {
                debug!(key = %key, "refusing to cache null value");
                return false;
            }
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "value not serializable, not cached");
                return false;
            }
        };

        match self
            .backend
            .set(key.as_str(), &json.to_string(), ttl)
            .await
        {
            Ok(()) => {
                debug!(key = %key, ttl_secs = ttl.as_secs(), "cached value");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache write failed");
                false
            }
        }
    }

    /// Remove one entry; returns whether it existed
    pub async fn evict(&self, key: &CacheKey) -> bool {
        match self.backend.delete(key.as_str()).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key = %key, error = %e, "cache evict failed");
                false
            }
        }
    }

    /// Remove every entry whose key starts with `prefix`
    pub async fn evict_by_prefix(&self, prefix: &str) -> usize {
        match self.backend.delete_prefix(prefix).await {
            Ok(removed) => {
                debug!(%prefix, removed, "evicted cache entries by prefix");
                removed
            }
            Err(e) => {
                warn!(%prefix, error = %e, "cache prefix evict failed");
                0
            }
        }
    }

    /// Remove every entry whose key starts with `prefix` and ends with `suffix`
    pub async fn evict_matching(&self, prefix: &str, suffix: &str) -> usize {
        match self.backend.delete_matching(prefix, suffix).await {
            Ok(removed) => {
                debug!(%prefix, %suffix, removed, "evicted matching cache entries");
                removed
            }
            Err(e) => {
                warn!(%prefix, %suffix, error = %e, "cache evict failed");
                0
            }
        }
    }

    /// Remove every entry of one category
    pub async fn evict_category(&self, category: CacheCategory) -> usize {
        self.evict_by_prefix(category.prefix()).await
    }

    /// Remove every entry
    pub async fn evict_all(&self) -> usize {
        match self.backend.clear().await {
            Ok(removed) => {
                debug!(removed, "cleared cache");
                removed
            }
            Err(e) => {
                warn!(error = %e, "cache clear failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::cache::{CacheError, InMemoryCacheBackend};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Bill {
        total: i64,
    }

    fn store() -> (Arc<InMemoryCacheBackend>, CacheStore) {
        let backend = Arc::new(InMemoryCacheBackend::new());
        (backend.clone(), CacheStore::new(backend))
    }

    fn bill_key(line: &str, month: &str) -> CacheKey {
        CacheKey::new(CacheCategory::BillData, [line, month])
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_then_get_until_ttl() {
        let (backend, cache) = store();
        let key = bill_key("01012345678", "2025-01");

        assert!(cache.put(&key, &Bill { total: 45000 }).await);
        assert_eq!(cache.get::<Bill>(&key).await, Some(Bill { total: 45000 }));
        assert_eq!(
            backend.entry(key.as_str()).unwrap().ttl,
            Duration::from_secs(3600)
        );

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(cache.get::<Bill>(&key).await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[tokio::test]
    async fn test_null_is_never_stored() {
        let (backend, cache) = store();
        let key = bill_key("01012345678", "2025-01");

        let missing: Option<Bill> = None;
        assert!(!cache.put(&key, &missing).await);
        assert!(!cache.put(&key, &serde_json::Value::Null).await);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_override() {
        let (backend, cache) = store();
        let cache = cache.with_ttl(CacheCategory::LineStatus, Duration::from_secs(5));
        let key = CacheKey::new(CacheCategory::LineStatus, ["01012345678"]);

        cache.put(&key, "ACTIVE").await;
        assert_eq!(
            backend.entry(key.as_str()).unwrap().ttl,
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_evict_variants() {
        let (_, cache) = store();
        let jan = bill_key("01012345678", "2025-01");
        let feb = bill_key("01012345678", "2025-02");
        let other = bill_key("01099998888", "2025-01");
        let status = CacheKey::new(CacheCategory::LineStatus, ["01012345678"]);
        for key in [&jan, &feb, &other, &status] {
            cache.put(key, &Bill { total: 1 }).await;
        }

        assert!(cache.evict(&jan).await);
        assert!(!cache.evict(&jan).await);
        assert_eq!(cache.evict_by_prefix("bill:data:01012345678:").await, 1);
        assert_eq!(cache.evict_category(CacheCategory::BillData).await, 1);
        assert_eq!(cache.evict_all().await, 1);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_evicted() {
        let (backend, cache) = store();
        let key = bill_key("01012345678", "2025-01");
        cache.put(&key, "not a bill").await;

        assert_eq!(cache.get::<Bill>(&key).await, None);
        assert!(backend.is_empty());
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Connection("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Connection("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Connection("down".into()))
        }
        async fn delete_prefix(&self, _: &str) -> Result<usize, CacheError> {
            Err(CacheError::Connection("down".into()))
        }
        async fn delete_matching(&self, _: &str, _: &str) -> Result<usize, CacheError> {
            Err(CacheError::Connection("down".into()))
        }
        async fn clear(&self) -> Result<usize, CacheError> {
            Err(CacheError::Connection("down".into()))
        }
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_miss() {
        let cache = CacheStore::new(Arc::new(BrokenBackend));
        let key = bill_key("01012345678", "2025-01");

        assert!(!cache.put(&key, &Bill { total: 1 }).await);
        assert_eq!(cache.get::<Bill>(&key).await, None);
        assert_eq!(cache.evict_all().await, 0);
        assert_eq!(cache.stats().misses, 1);
    }
}
