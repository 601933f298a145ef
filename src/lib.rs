//! # Route Cache
//!
//! Cache-aside layer for HTTP responses. Responses to eligible requests are
//! stored in a shared key-value store (Redis, or an in-process map) under a
//! deterministic key, served from there until they expire, and recomputed by
//! a single producer at a time when they go missing.
//!
//! ## Modules
//! - [`core`]: configuration, crate-level errors, request/response types
//! - [`caching`]: key generation, stores, coordinator, axum middleware and
//!   the admin router
//! - [`observability`]: logging initialisation

/// Configuration, errors and the request/response types the cache consumes
pub mod core;

/// The cache itself
pub mod caching;

/// Logging setup
pub mod observability;

pub use caching::middleware::{cache_layer, cache_layer_with_ttl, CacheLayer};
pub use caching::{CacheCoordinator, CacheError, CacheManager, CacheResult, CacheStatus};
pub use core::config::RouteCacheConfig;
pub use core::error::{RouteCacheError, RouteCacheResult};
pub use core::types::{CacheIdentity, CacheRequest, CacheResponse};
