//! # Caching System Module
//!
//! Cache-aside layer for HTTP responses backed by a shared key-value store.
//!
//! ## Architecture
//! 1. **Key Generator**: derives a deterministic key from method, path,
//!    filtered query and identity
//! 2. **Entry Codec**: turns a response into a storable entry, compressing
//!    large bodies
//! 3. **Cache Stores**: Redis and in-memory backends behind [`CacheStore`]
//! 4. **Cache Manager**: namespaced, hashed entry storage plus the
//!    stampede lock
//! 5. **Validator**: request/response eligibility
//! 6. **Coordinator**: lookup, lock protocol, downstream call, store
//! 7. **Response Builder**: rebuilds responses from stored entries
//! 8. **Middleware / Admin**: axum integration and management endpoints
//!
//! ## Usage Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use route_cache::caching::{CacheCoordinator, CacheManager, InMemoryCache, middleware};
//! use route_cache::core::config::RouteCacheConfig;
//!
//! let config = Arc::new(RouteCacheConfig::default());
//! let manager = Arc::new(CacheManager::new(Arc::new(InMemoryCache::new()), config.clone()));
//! let coordinator = Arc::new(CacheCoordinator::new(manager, config));
//!
//! let app = axum::Router::new()
//!     .route("/blog", axum::routing::get(|| async { "posts" }))
//!     .layer(middleware::cache_layer(coordinator));
//! ```

pub mod admin;
pub mod cache_manager;
pub mod codec;
pub mod coordinator;
pub mod key_generator;
pub mod middleware;
pub mod response_builder;
pub mod stores;
pub mod validator;

pub use admin::{CacheAdminRouter, CacheAdminState};
pub use cache_manager::{CacheManager, CacheStats};
pub use codec::{CacheEntry, DecodedResponse, EntryCodec, ZlibEntryCodec};
pub use coordinator::{CacheCoordinator, CacheFailure, CacheStatus};
pub use key_generator::{DefaultKeyGenerator, KeyGenerator};
pub use response_builder::{BodyKind, ResponseBuilder};
pub use stores::{CacheStore, InMemoryCache, KeyTtl, RedisCache};
pub use validator::{CacheValidator, DefaultCacheValidator};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}
