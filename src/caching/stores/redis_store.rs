//! # Redis Cache Store
//!
//! Redis backend with a shared `ConnectionManager`, per-command timeout,
//! bounded retry with reconnect, and the lock primitives:
//! - acquisition is `SET key token NX EX ttl`
//! - release runs a Lua compare-and-delete, so no other client can slip in
//!   between the comparison and the delete
//!
//! Every key is stored as `key_prefix + key`. `SCAN` returns keys with that
//! prefix still attached; `clear` deletes exactly the names SCAN produced and
//! `keys` strips the prefix only for display, so deletions always target the
//! real storage addresses.

use super::{CacheStore, KeyTtl};
use crate::caching::{CacheError, CacheResult};
use crate::core::config::RedisSettings;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult, Script};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Deletes KEYS[1] only while it still holds ARGV[1]
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const SCAN_BATCH: usize = 1000;
const DELETE_BATCH: usize = 500;

/// Redis cache configuration
pub type RedisCacheConfig = RedisSettings;

type RedisFuture<T> = Pin<Box<dyn Future<Output = RedisResult<T>> + Send>>;

/// Redis cache implementation
pub struct RedisCache {
    config: RedisCacheConfig,

    /// Swapped wholesale on reconnect; commands run on a clone
    connection_manager: Arc<RwLock<ConnectionManager>>,

    release_script: Script,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn new(config: RedisCacheConfig) -> CacheResult<Self> {
        let connection_manager = Self::connect(&config).await?;

        info!(prefix = %config.key_prefix, "Redis cache connected");

        Ok(Self {
            config,
            connection_manager: Arc::new(RwLock::new(connection_manager)),
            release_script: Script::new(COMPARE_AND_DELETE),
        })
    }

    async fn connect(config: &RedisCacheConfig) -> CacheResult<ConnectionManager> {
        let client = Client::open(config.url.as_str())?;

        tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(CacheError::Redis)
    }

    /// Get the full storage key with the transport prefix
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Execute a Redis operation with timeout and retry
    async fn execute_with_retry<F, T>(&self, operation: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> RedisFuture<T> + Send + Sync,
        T: Send,
    {
        let mut retries = 0;

        loop {
            let conn = self.connection_manager.read().await.clone();

            let failure = match tokio::time::timeout(self.config.operation_timeout, operation(conn)).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    error!("Redis operation failed: {}", e);
                    CacheError::Redis(e)
                }
                Err(_) => {
                    warn!(timeout = ?self.config.operation_timeout, "Redis operation timed out");
                    CacheError::Timeout
                }
            };

            if retries >= self.config.max_retries {
                return Err(failure);
            }

            retries += 1;
            tokio::time::sleep(self.config.retry_delay * retries).await;

            if let Err(reconnect_err) = self.reconnect().await {
                warn!("Failed to reconnect to Redis: {}", reconnect_err);
            }
        }
    }

    /// Reconnect to Redis
    async fn reconnect(&self) -> CacheResult<()> {
        let new_connection_manager = Self::connect(&self.config).await?;

        let mut conn = self.connection_manager.write().await;
        *conn = new_connection_manager;

        info!("Reconnected to Redis");
        Ok(())
    }

    /// Full names of every key under the transport prefix
    async fn scan_namespace(&self) -> CacheResult<Vec<String>> {
        let pattern = format!("{}*", self.config.key_prefix);

        self.execute_with_retry(|mut conn| {
            let pattern = pattern.clone();
            Box::pin(async move {
                let mut cursor: u64 = 0;
                let mut all_keys = Vec::new();

                loop {
                    let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;

                    all_keys.extend(keys);

                    if new_cursor == 0 {
                        break;
                    }
                    cursor = new_cursor;
                }

                Ok(all_keys)
            })
        })
        .await
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.full_key(key);

        let value = self
            .execute_with_retry(|mut conn| {
                let full_key = full_key.clone();
                Box::pin(async move { conn.get::<_, Option<Vec<u8>>>(&full_key).await })
            })
            .await?;

        debug!(key, hit = value.is_some(), "Redis get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        let full_key = self.full_key(key);
        let value = value.to_vec();
        let ttl_seconds = ttl.map(|ttl| ttl.as_secs()).filter(|secs| *secs > 0);

        self.execute_with_retry(|mut conn| {
            let full_key = full_key.clone();
            let value = value.clone();
            Box::pin(async move {
                match ttl_seconds {
                    Some(secs) => conn.set_ex::<_, _, ()>(&full_key, &value, secs).await,
                    None => conn.set::<_, _, ()>(&full_key, &value).await,
                }
            })
        })
        .await?;

        debug!(key, ttl = ?ttl_seconds, "Set Redis cache key");
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        let value = value.to_vec();
        let ttl_seconds = ttl.as_secs().max(1);

        let reply: Option<String> = self
            .execute_with_retry(|mut conn| {
                let full_key = full_key.clone();
                let value = value.clone();
                Box::pin(async move {
                    redis::cmd("SET")
                        .arg(&full_key)
                        .arg(&value)
                        .arg("NX")
                        .arg("EX")
                        .arg(ttl_seconds)
                        .query_async::<_, Option<String>>(&mut conn)
                        .await
                })
            })
            .await?;

        Ok(reply.as_deref() == Some("OK"))
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        let expected = expected.to_vec();

        let deleted: i64 = self
            .execute_with_retry(|mut conn| {
                let full_key = full_key.clone();
                let expected = expected.clone();
                let script = self.release_script.clone();
                Box::pin(async move {
                    script
                        .key(&full_key)
                        .arg(&expected)
                        .invoke_async::<_, i64>(&mut conn)
                        .await
                })
            })
            .await?;

        Ok(deleted > 0)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);

        let deleted_count: i64 = self
            .execute_with_retry(|mut conn| {
                let full_key = full_key.clone();
                Box::pin(async move { conn.del(&full_key).await })
            })
            .await?;

        if deleted_count > 0 {
            debug!("Deleted Redis cache key: {}", key);
        }

        Ok(deleted_count > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);

        self.execute_with_retry(|mut conn| {
            let full_key = full_key.clone();
            Box::pin(async move { conn.exists(&full_key).await })
        })
        .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let full_key = self.full_key(key);

        let ttl: i64 = self
            .execute_with_retry(|mut conn| {
                let full_key = full_key.clone();
                Box::pin(async move { conn.ttl(&full_key).await })
            })
            .await?;

        // -2: no such key, -1: no expiry
        Ok(match ttl {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            secs => KeyTtl::Expires(secs.max(0) as u64),
        })
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let prefix = &self.config.key_prefix;
        let keys = self.scan_namespace().await?;

        Ok(keys
            .into_iter()
            .map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string).unwrap_or(key))
            .collect())
    }

    async fn clear(&self) -> CacheResult<usize> {
        let keys = self.scan_namespace().await?;
        let mut deleted = 0usize;

        for batch in keys.chunks(DELETE_BATCH) {
            let batch = batch.to_vec();
            let count: i64 = self
                .execute_with_retry(|mut conn| {
                    let batch = batch.clone();
                    Box::pin(async move { conn.del(&batch).await })
                })
                .await?;
            deleted += count.max(0) as usize;
        }

        info!("Cleared {} keys from Redis cache", deleted);
        Ok(deleted)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result = self
            .execute_with_retry(|mut conn| {
                Box::pin(async move { redis::cmd("PING").query_async::<_, String>(&mut conn).await })
            })
            .await;

        match result {
            Ok(response) => Ok(response == "PONG"),
            Err(_) => Ok(false),
        }
    }
}
