//! # In-Memory Cache Store
//!
//! Single-process backend built on `DashMap`. Expiry is lazy: an expired
//! entry is dropped the next time anything touches its key, and every
//! [`SWEEP_INTERVAL`] writes the whole map is swept, so keys that are never
//! read again are still reclaimed without a background task.
//!
//! `set_nx` and `compare_and_delete` hold the shard lock for the key while
//! they decide, which makes both atomic with respect to other callers.

use super::{CacheStore, KeyTtl};
use crate::caching::CacheResult;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Writes between two full sweeps of expired entries
pub const SWEEP_INTERVAL: u64 = 128;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: &[u8], ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory cache implementation
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Arc<DashMap<String, StoredValue>>,
    expired_cleanups: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryCache {
    /// Create a new in-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries (expired ones are purged first)
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expired entries reclaimed so far
    pub fn expired_cleanups(&self) -> u64 {
        self.expired_cleanups.load(Ordering::Relaxed)
    }

    /// Count a write and sweep the map when the interval comes round
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }
    }

    fn purge_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.is_expired());
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            self.expired_cleanups.fetch_add(purged as u64, Ordering::Relaxed);
            debug!("Purged {} expired in-memory entries", purged);
        }
    }

    /// Drop `key` if it has expired
    fn evict_if_expired(&self, key: &str) {
        if self.entries.remove_if(key, |_, stored| stored.is_expired()).is_some() {
            self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.evict_if_expired(key);
        Ok(self.entries.get(key).map(|stored| stored.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.entries.insert(key.to_string(), StoredValue::new(value, ttl));
        self.record_write();
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        let acquired = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, Some(ttl)));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, Some(ttl)));
                true
            }
        };

        // the entry guard must be released before sweeping
        if acquired {
            self.record_write();
        }
        Ok(acquired)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, stored| !stored.is_expired() && stored.value == expected);
        Ok(removed.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.evict_if_expired(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.evict_if_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.evict_if_expired(key);
        let ttl = match self.entries.get(key) {
            None => KeyTtl::Missing,
            Some(stored) => match stored.expires_at {
                None => KeyTtl::Persistent,
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(Instant::now()).as_secs()),
            },
        };
        Ok(ttl)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.purge_expired();
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn clear(&self) -> CacheResult<usize> {
        let entry_count = self.entries.len();
        self.entries.clear();

        info!("Cleared {} entries from in-memory cache", entry_count);
        Ok(entry_count)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = InMemoryCache::new();

        let key = "test_key";
        let value = b"test_value";

        cache.set(key, value, Some(Duration::from_secs(60))).await.unwrap();
        let result = cache.get(key).await.unwrap();
        assert_eq!(result, Some(value.to_vec()));

        assert!(cache.exists(key).await.unwrap());

        assert!(cache.delete(key).await.unwrap());
        assert!(!cache.exists(key).await.unwrap());
        assert!(!cache.delete(key).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = InMemoryCache::new();

        cache
            .set("expire_test", b"expire_value", Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(cache.ttl("expire_test").await.unwrap(), KeyTtl::Expires(2));

        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.get("expire_test").await.unwrap(), None);
        assert_eq!(cache.ttl("expire_test").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_reclaimed_by_later_writes() {
        let cache = InMemoryCache::new();
        let payload = vec![7u8; 1024];

        for i in 0..1000 {
            cache
                .set(&format!("variant:{}", i), &payload, Some(Duration::from_secs(1)))
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(5)).await;

        for i in 0..SWEEP_INTERVAL {
            cache.set(&format!("fresh:{}", i), b"v", None).await.unwrap();
        }

        assert!(cache.entries.len() <= SWEEP_INTERVAL as usize);
        assert!(cache.expired_cleanups() >= 1000);
        assert_eq!(cache.get("fresh:0").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_persistent_ttl() {
        let cache = InMemoryCache::new();
        cache.set("forever", b"v", None).await.unwrap();
        assert_eq!(cache.ttl("forever").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(cache.ttl("nope").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_set_nx_is_exclusive() {
        let cache = Arc::new(InMemoryCache::new());

        let attempts = (0..16).map(|i| {
            let cache = cache.clone();
            async move {
                cache
                    .set_nx("lock", format!("token-{}", i).as_bytes(), Duration::from_secs(5))
                    .await
                    .unwrap()
            }
        });

        let winners = join_all(attempts).await.into_iter().filter(|won| *won).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_after_expiry() {
        let cache = InMemoryCache::new();
        assert!(cache.set_nx("lock", b"a", Duration::from_secs(1)).await.unwrap());
        assert!(!cache.set_nx("lock", b"b", Duration::from_secs(1)).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.set_nx("lock", b"c", Duration::from_secs(1)).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some(b"c".to_vec()));
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let cache = InMemoryCache::new();
        cache.set_nx("lock", b"mine", Duration::from_secs(5)).await.unwrap();

        assert!(!cache.compare_and_delete("lock", b"theirs").await.unwrap());
        assert!(cache.exists("lock").await.unwrap());

        assert!(cache.compare_and_delete("lock", b"mine").await.unwrap());
        assert!(!cache.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_and_clear() {
        let cache = InMemoryCache::new();
        cache.set("a", b"1", None).await.unwrap();
        cache.set("b", b"2", None).await.unwrap();

        let mut keys = cache.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.is_empty());
    }
}
