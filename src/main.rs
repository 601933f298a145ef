//! # Route Cache - Admin Server
//!
//! Loads configuration, connects the configured store and serves the cache
//! administration API until Ctrl-C or SIGTERM.

use std::path::Path;
use std::sync::Arc;

use route_cache::caching::{CacheAdminRouter, CacheAdminState, CacheManager, CacheStore, InMemoryCache, RedisCache};
use route_cache::core::config::{RouteCacheConfig, StoreKind};
use route_cache::observability::init_logging;
use route_cache::{RouteCacheError, RouteCacheResult};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "route-cache.yaml";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Route cache admin server failed");
        eprintln!("route-cache: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> RouteCacheResult<()> {
    let config = Arc::new(load_config().await?);
    init_logging(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), store = %config.store, "Starting route cache admin server");

    let store = connect_store(&config).await?;
    let cache_manager = Arc::new(CacheManager::new(store, config.clone()));

    match cache_manager.health_check().await {
        Ok(true) => info!("Cache store is healthy"),
        Ok(false) => warn!("Cache store reported unhealthy at startup"),
        Err(e) => warn!(error = %e, "Cache store health check failed at startup"),
    }

    let app = CacheAdminRouter::create_router(CacheAdminState::new(cache_manager, config.clone()))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!(address = %config.server.bind_address, "Admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Route cache admin server stopped");
    Ok(())
}

/// File from `ROUTE_CACHE_CONFIG` (or `route-cache.yaml`) when present, defaults otherwise
async fn load_config() -> RouteCacheResult<RouteCacheConfig> {
    let path = std::env::var("ROUTE_CACHE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let path = Path::new(&path);

    if path.exists() {
        return match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => RouteCacheConfig::load_from_json(path).await,
            _ => RouteCacheConfig::load_from_file(path).await,
        };
    }

    let mut config = RouteCacheConfig::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

async fn connect_store(config: &RouteCacheConfig) -> RouteCacheResult<Arc<dyn CacheStore>> {
    match config.store {
        StoreKind::Redis => {
            let store = RedisCache::new(config.redis.clone())
                .await
                .map_err(|e| RouteCacheError::config(format!("Failed to connect to Redis: {}", e)))?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            warn!("Using the in-memory store; entries are not shared between processes");
            Ok(Arc::new(InMemoryCache::new()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
