//! # Cache Admin Interface
//!
//! Administrative endpoints for inspecting and purging the route cache.
//! Every handler delegates straight to [`CacheManager`]. Keys are the
//! plain-text keys the manager accepts (`GET:blog`); a path such as `/blog/`
//! is first reduced to the route form the key generator produces (`blog`).

use super::cache_manager::{CacheManager, CacheStats};
use super::key_generator::escape_path_segment;
use crate::core::config::RouteCacheConfig;
use crate::core::error::{RouteCacheError, RouteCacheResult};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Cache admin state
#[derive(Clone)]
pub struct CacheAdminState {
    pub cache_manager: Arc<CacheManager>,
    pub config: Arc<RouteCacheConfig>,
}

impl CacheAdminState {
    pub fn new(cache_manager: Arc<CacheManager>, config: Arc<RouteCacheConfig>) -> Self {
        Self { cache_manager, config }
    }
}

/// Cache admin router
pub struct CacheAdminRouter;

impl CacheAdminRouter {
    /// Create cache admin router
    pub fn create_router(state: CacheAdminState) -> Router {
        Router::new()
            .route("/cache/stats", get(get_cache_stats))
            .route("/cache/health", get(get_cache_health))
            .route("/cache/config", get(get_cache_config))
            .route("/cache/flush", post(flush_cache))
            .route("/cache/keys", get(get_cache_key).delete(forget_cache_key))
            .with_state(state)
    }
}

/// Settings echoed alongside the statistics
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub enabled: bool,
    pub store: String,
    pub default_ttl_seconds: Option<u64>,
    pub cache_key_prefix: String,
    pub lock_enabled: bool,
    pub add_cache_headers: bool,
}

impl ConfigSummary {
    fn from_config(config: &RouteCacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            store: config.store.to_string(),
            default_ttl_seconds: config.effective_default_ttl().map(|ttl| ttl.as_secs()),
            cache_key_prefix: config.cache_key_prefix.clone(),
            lock_enabled: config.lock.enabled,
            add_cache_headers: config.add_cache_headers,
        }
    }
}

/// Cache statistics response
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub stats: CacheStats,
    pub config: ConfigSummary,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Cache health response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheHealthResponse {
    pub healthy: bool,
    pub store: String,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Effective configuration response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheConfigResponse {
    pub config: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Result of a flush or forget
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheInvalidationResponse {
    pub success: bool,
    pub message: String,
    pub invalidated_count: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Single key inspection
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheKeyResponse {
    pub key: String,
    pub hashed_key: String,
    pub exists: bool,
    pub ttl_seconds: Option<u64>,
    pub ttl_display: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `?key=` query for the key endpoints
#[derive(Debug, Deserialize)]
pub struct CacheKeyQuery {
    pub key: String,
}

/// Get cache statistics
pub async fn get_cache_stats(State(state): State<CacheAdminState>) -> RouteCacheResult<Json<CacheStatsResponse>> {
    let stats = state.cache_manager.stats().await?;

    Ok(Json(CacheStatsResponse {
        stats,
        config: ConfigSummary::from_config(&state.config),
        timestamp: chrono::Utc::now(),
    }))
}

/// Get cache health status
pub async fn get_cache_health(State(state): State<CacheAdminState>) -> Json<CacheHealthResponse> {
    let (healthy, error) = match state.cache_manager.health_check().await {
        Ok(healthy) => (healthy, None),
        Err(e) => {
            warn!(error = %e, "Cache store health check failed");
            (false, Some(e.to_string()))
        }
    };

    Json(CacheHealthResponse {
        healthy,
        store: state.config.store.to_string(),
        error,
        timestamp: chrono::Utc::now(),
    })
}

/// Get the effective configuration, with credentials stripped from the Redis URL
pub async fn get_cache_config(State(state): State<CacheAdminState>) -> RouteCacheResult<Json<CacheConfigResponse>> {
    let mut config = serde_json::to_value(state.config.as_ref())?;

    if let Some(url) = config.pointer_mut("/redis/url") {
        if let Some(raw) = url.as_str() {
            *url = serde_json::Value::String(redact_url(raw));
        }
    }

    Ok(Json(CacheConfigResponse {
        config,
        timestamp: chrono::Utc::now(),
    }))
}

/// Delete every entry under the namespace
pub async fn flush_cache(State(state): State<CacheAdminState>) -> RouteCacheResult<Json<CacheInvalidationResponse>> {
    let deleted = state.cache_manager.flush().await?;
    info!(deleted, "Cache flushed via admin API");

    Ok(Json(CacheInvalidationResponse {
        success: true,
        message: format!("Flushed {} keys", deleted),
        invalidated_count: deleted,
        timestamp: chrono::Utc::now(),
    }))
}

/// Inspect a single key
pub async fn get_cache_key(
    State(state): State<CacheAdminState>,
    Query(query): Query<CacheKeyQuery>,
) -> RouteCacheResult<Json<CacheKeyResponse>> {
    let manager = &state.cache_manager;
    let key = route_key(&query.key);
    let hashed_key = manager.hashed_key(&key);
    let exists = manager.has(&key).await?;
    let ttl = manager.key_ttl(&key).await?;

    Ok(Json(CacheKeyResponse {
        hashed_key,
        exists,
        ttl_seconds: ttl.seconds(),
        ttl_display: super::cache_manager::format_ttl(ttl),
        key: query.key,
        timestamp: chrono::Utc::now(),
    }))
}

/// Forget a single key
pub async fn forget_cache_key(
    State(state): State<CacheAdminState>,
    Query(query): Query<CacheKeyQuery>,
) -> RouteCacheResult<Json<CacheInvalidationResponse>> {
    if !state.cache_manager.forget(&route_key(&query.key)).await? {
        return Err(RouteCacheError::not_found(format!("No cache entry for '{}'", query.key)));
    }

    info!(key = %query.key, "Cache key forgotten via admin API");
    Ok(Json(CacheInvalidationResponse {
        success: true,
        message: format!("Key '{}' removed", query.key),
        invalidated_count: 1,
        timestamp: chrono::Utc::now(),
    }))
}

/// `/blog/` -> `blog`, `/` stays `/`, `/a:b` -> `a%3Ab`; anything else is passed through
fn route_key(raw: &str) -> String {
    if !raw.starts_with('/') {
        return raw.to_string();
    }
    match raw.trim_matches('/') {
        "" => "/".to_string(),
        trimmed => escape_path_segment(trimmed),
    }
}

fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => raw.to_string(),
    }
}
