//! Cache-aside storage
//!
//! This module provides:
//! - [`CacheCategory`] and [`CacheKey`] - key prefixes and default TTLs
//! - [`CacheBackend`] trait with [`InMemoryCacheBackend`] and, behind the
//!   `redis` feature, `RedisCacheBackend`
//! - [`CacheStore`] - typed get/put/evict with hit and miss counters

mod backend;
mod category;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use backend::{CacheBackend, CacheError};
pub use category::{CacheCategory, CacheKey};
pub use memory::{CacheEntry, InMemoryCacheBackend};
#[cfg(feature = "redis")]
pub use self::redis::RedisCacheBackend;
pub use store::{CacheStats, CacheStore};
