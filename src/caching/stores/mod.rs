//! # Cache Stores Module
//!
//! Backend implementations addressed by opaque storage keys. Keys arriving
//! here are already hashed; each backend only adds its own transport
//! namespace.
//!
//! Besides plain key-value access the contract carries the two primitives the
//! stampede lock is built on: an atomic "set if absent with expiry" and an
//! atomic "delete if value equals".

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::CacheResult;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Remaining lifetime of a stored key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "seconds", rename_all = "snake_case")]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after the given number of seconds
    Expires(u64),
}

impl KeyTtl {
    /// Seconds remaining, absent for missing or non-expiring keys
    pub fn seconds(self) -> Option<u64> {
        match self {
            Self::Expires(secs) => Some(secs),
            _ => None,
        }
    }
}

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value, with no expiry when `ttl` is `None`
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Set a value only if the key is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool>;

    /// Delete the key only if its current value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool>;

    /// Delete a value from the cache
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Check if a key exists in the cache
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remaining lifetime of a key
    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl>;

    /// Every key in this store's namespace, namespace removed
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// Delete every key in this store's namespace, returning how many went
    async fn clear(&self) -> CacheResult<usize>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}
