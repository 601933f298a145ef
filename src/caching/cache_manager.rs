//! # Cache Manager
//!
//! Namespaced entry storage on top of a [`CacheStore`] backend.
//!
//! Callers pass plain-text keys (`GET:blog`, or just `/blog`); the manager
//! normalises them, hashes them together with the configured key prefix and
//! serialises [`CacheEntry`] values as JSON. The stampede lock lives in the
//! `lock:` sub-namespace of the same hashed address.

use super::codec::{CacheEntry, EntryCodec, ZlibEntryCodec};
use super::stores::{CacheStore, KeyTtl};
use super::{CacheError, CacheResult};
use crate::core::config::RouteCacheConfig;
use crate::core::types::CacheResponse;
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOCK_PREFIX: &str = "lock:";
const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];
const STATS_SAMPLE_SIZE: usize = 10;

/// Snapshot returned by [`CacheManager::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Keys under the namespace, lock keys included
    pub total_keys: usize,

    /// First keys in sorted order
    pub sample: Vec<KeySample>,

    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeySample {
    pub key: String,
    pub ttl: KeyTtl,
    pub ttl_display: String,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Namespaced cache with hashing, entry encoding and locking
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    codec: Arc<dyn EntryCodec>,
    config: Arc<RouteCacheConfig>,
    counters: Counters,
}

impl CacheManager {
    /// Create a manager with the zlib codec configured from `config`
    pub fn new(store: Arc<dyn CacheStore>, config: Arc<RouteCacheConfig>) -> Self {
        Self {
            store,
            codec: Arc::new(ZlibEntryCodec::new(config.compression_threshold)),
            config,
            counters: Counters::default(),
        }
    }

    /// Replace the entry codec
    pub fn with_codec(mut self, codec: Arc<dyn EntryCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn codec(&self) -> &dyn EntryCodec {
        self.codec.as_ref()
    }

    pub fn config(&self) -> &RouteCacheConfig {
        &self.config
    }

    /// Prepend `GET:` unless the key already starts with an HTTP method
    pub fn normalize_key(key: &str) -> String {
        let has_method = key
            .split_once(':')
            .is_some_and(|(method, _)| HTTP_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method)));

        if has_method {
            key.to_string()
        } else {
            format!("GET:{}", key)
        }
    }

    /// Storage address of a plain-text key
    pub fn hashed_key(&self, key: &str) -> String {
        let material = format!("{}:{}", self.config.cache_key_prefix, Self::normalize_key(key));
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    pub fn lock_key(&self, key: &str) -> String {
        format!("{}{}", LOCK_PREFIX, self.hashed_key(key))
    }

    /// Count failures before handing them back
    fn track<T>(&self, result: CacheResult<T>) -> CacheResult<T> {
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            counter!("route_cache.store_error").increment(1);
        }
        result
    }

    /// Fetch an entry. Unparseable stored values are reported as absent.
    pub async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let raw = self.track(self.store.get(&self.hashed_key(key)).await)?;

        let entry = raw.and_then(|bytes| match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cache entry");
                None
            }
        });

        if entry.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }

        Ok(entry)
    }

    /// Store an already encoded entry. `None` or a zero TTL stores without expiry.
    pub async fn put_entry(&self, key: &str, entry: &CacheEntry, ttl: Option<Duration>) -> CacheResult<()> {
        let serialized = serde_json::to_vec(entry)?;
        let ttl = ttl.filter(|ttl| ttl.as_secs() > 0);

        self.track(self.store.set(&self.hashed_key(key), &serialized, ttl).await)?;
        debug!(key, ttl = ?ttl, compressed = entry.compressed, "Stored cache entry");
        Ok(())
    }

    /// Encode and store a buffered response.
    ///
    /// Encoding happens before the returned future so the response is not
    /// borrowed across the store call.
    pub fn put<'a>(
        &'a self,
        key: &'a str,
        response: &CacheResponse,
        ttl: Option<Duration>,
    ) -> impl Future<Output = CacheResult<()>> + Send + 'a {
        let entry = self.encode_response(response);
        async move { self.put_entry(key, &entry?, ttl).await }
    }

    fn encode_response(&self, response: &CacheResponse) -> CacheResult<CacheEntry> {
        let body = response.bytes().ok_or_else(|| CacheError::Store {
            message: "Streaming responses cannot be cached".to_string(),
        })?;

        self.codec.encode(response.status, &response.headers, body)
    }

    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        self.track(self.store.exists(&self.hashed_key(key)).await)
    }

    /// Remove one entry, reporting whether it existed
    pub async fn forget(&self, key: &str) -> CacheResult<bool> {
        let deleted = self.track(self.store.delete(&self.hashed_key(key)).await)?;
        if deleted {
            info!(key, "Forgot cache entry");
        }
        Ok(deleted)
    }

    /// Remaining seconds, absent for missing or non-expiring entries
    pub async fn ttl(&self, key: &str) -> CacheResult<Option<u64>> {
        Ok(self.key_ttl(key).await?.seconds())
    }

    pub async fn key_ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.track(self.store.ttl(&self.hashed_key(key)).await)
    }

    /// Delete everything under the namespace
    pub async fn flush(&self) -> CacheResult<usize> {
        let deleted = self.track(self.store.clear().await)?;
        info!(deleted, "Flushed route cache");
        Ok(deleted)
    }

    /// Try to become the producer for `key`. Returns the lock token on success.
    pub async fn acquire_lock(&self, key: &str, ttl_seconds: u64) -> CacheResult<Option<String>> {
        let token = hex::encode(rand::random::<[u8; 16]>());
        let ttl = Duration::from_secs(ttl_seconds.max(1));

        let acquired = self.track(self.store.set_nx(&self.lock_key(key), token.as_bytes(), ttl).await)?;
        Ok(acquired.then_some(token))
    }

    /// Release the lock only if it is still held under `token`
    pub async fn release_lock(&self, key: &str, token: &str) -> CacheResult<bool> {
        self.track(
            self.store
                .compare_and_delete(&self.lock_key(key), token.as_bytes())
                .await,
        )
    }

    pub async fn is_locked(&self, key: &str) -> CacheResult<bool> {
        self.track(self.store.exists(&self.lock_key(key)).await)
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.store.health_check().await
    }

    /// Key count, a sorted sample with TTLs, and counters
    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let mut keys = self.track(self.store.keys().await)?;
        keys.sort();

        let mut sample = Vec::with_capacity(STATS_SAMPLE_SIZE.min(keys.len()));
        for key in keys.iter().take(STATS_SAMPLE_SIZE) {
            let ttl = self.track(self.store.ttl(key).await)?;
            sample.push(KeySample {
                key: key.clone(),
                ttl,
                ttl_display: format_ttl(ttl),
            });
        }

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        Ok(CacheStats {
            total_keys: keys.len(),
            sample,
            hits,
            misses,
            errors: self.counters.errors.load(Ordering::Relaxed),
            hit_ratio: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
        })
    }
}

/// Human-readable remaining lifetime
pub fn format_ttl(ttl: KeyTtl) -> String {
    match ttl {
        KeyTtl::Missing => "Key not found".to_string(),
        KeyTtl::Persistent => "No expiry".to_string(),
        KeyTtl::Expires(seconds) => format_seconds(seconds),
    }
}

/// `59 seconds`, `1 minute 5 seconds`, `2 hours 3 minutes`, `1 day 4 hours`
pub fn format_seconds(seconds: u64) -> String {
    fn unit(count: u64, name: &str) -> String {
        format!("{} {}{}", count, name, if count == 1 { "" } else { "s" })
    }

    fn pair(major: String, minor: u64, name: &str) -> String {
        if minor > 0 {
            format!("{} {}", major, unit(minor, name))
        } else {
            major
        }
    }

    match seconds {
        0..=59 => unit(seconds, "second"),
        60..=3599 => pair(unit(seconds / 60, "minute"), seconds % 60, "second"),
        3600..=86399 => pair(unit(seconds / 3600, "hour"), (seconds % 3600) / 60, "minute"),
        _ => pair(unit(seconds / 86400, "day"), (seconds % 86400) / 3600, "hour"),
    }
}
