//! Redis implementation of CacheBackend

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tracing::debug;

use super::backend::{CacheBackend, CacheError};

/// Redis-backed cache
///
/// All keys are stored under `namespace:` so that [`CacheBackend::clear`]
/// only removes this application's entries.
#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: MultiplexedConnection,
    namespace: String,
}

impl RedisCacheBackend {
    /// Connect using a Redis URL (e.g. "redis://127.0.0.1:6379")
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(map_redis_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        Ok(Self::from_connection(conn, namespace))
    }

    pub fn from_connection(conn: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn delete_pattern(&self, pattern: String) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(map_redis_error)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(&keys).await.map_err(map_redis_error)?;
        debug!(%pattern, removed, "deleted matching cache keys");
        Ok(removed)
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(self.full_key(key))
            .await
            .map_err(map_redis_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let millis = ttl.as_millis().max(1) as u64;
        conn.pset_ex::<_, _, ()>(self.full_key(key), value, millis)
            .await
            .map_err(map_redis_error)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn
            .del(self.full_key(key))
            .await
            .map_err(map_redis_error)?;
        Ok(count > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        self.delete_pattern(format!("{}*", self.full_key(&escape_glob(prefix))))
            .await
    }

    async fn delete_matching(&self, prefix: &str, suffix: &str) -> Result<usize, CacheError> {
        self.delete_pattern(format!(
            "{}*{}",
            self.full_key(&escape_glob(prefix)),
            escape_glob(suffix)
        ))
        .await
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        self.delete_pattern(format!("{}:*", escape_glob(&self.namespace)))
            .await
    }
}

/// Escape glob metacharacters so a literal prefix can be used with SCAN MATCH
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn map_redis_error(err: RedisError) -> CacheError {
    CacheError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_redis_error() {
        let err = map_redis_error(RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )));
        match err {
            CacheError::Connection(msg) => assert!(msg.contains("connection refused")),
            other => panic!("Expected Connection error, got {other:?}"),
        }
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("bill:data:"), "bill:data:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
