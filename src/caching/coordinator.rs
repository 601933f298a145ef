//! # Cache Coordinator
//!
//! Runs one request through the cache:
//!
//! 1. disabled or ineligible requests bypass the cache
//! 2. a stored entry is served as a HIT
//! 3. otherwise the downstream handler produces the response, guarded by the
//!    stampede lock when locking is enabled, and eligible responses are stored
//!
//! While another request holds the lock, waiters poll: each round sleeps,
//! checks for the producer's entry and retries the lock. A waiter that runs
//! out of budget computes its own response and does not store it.
//!
//! [`CacheCoordinator::try_handle`] reports cache faults that happen before the
//! downstream handler runs, handing the handler back uninvoked.
//! [`CacheCoordinator::handle`] is the fail-open wrapper used by the
//! middleware.

use super::cache_manager::CacheManager;
use super::codec::CacheEntry;
use super::key_generator::{DefaultKeyGenerator, KeyGenerator};
use super::response_builder::ResponseBuilder;
use super::validator::{CacheValidator, DefaultCacheValidator};
use super::CacheError;
use crate::core::config::{parse_ttl, RouteCacheConfig, HEADER_CACHE_KEY, HEADER_CACHE_STATUS};
use crate::core::types::{CacheRequest, CacheResponse};
use futures::FutureExt;
use metrics::counter;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Value of the `x-cache-status` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache fault raised before the downstream handler ran
pub struct CacheFailure<F> {
    pub error: CacheError,
    /// The handler, still uninvoked
    pub downstream: F,
}

impl<F> fmt::Debug for CacheFailure<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFailure").field("error", &self.error).finish_non_exhaustive()
    }
}

/// Result of trying to become the producer for a key
enum LockOutcome {
    Acquired(String),
    /// Another producer stored the entry while we waited
    Filled(CacheEntry),
    /// Wait budget spent
    Exhausted,
    /// The first acquisition attempt failed at the store
    Unavailable,
    Failed(CacheError),
}

/// Orchestrates lookup, locking, downstream invocation and storage
pub struct CacheCoordinator {
    manager: Arc<CacheManager>,
    config: Arc<RouteCacheConfig>,
    key_generator: Arc<dyn KeyGenerator>,
    validator: Arc<dyn CacheValidator>,
    response_builder: ResponseBuilder,
}

impl CacheCoordinator {
    pub fn new(manager: Arc<CacheManager>, config: Arc<RouteCacheConfig>) -> Self {
        Self {
            key_generator: Arc::new(DefaultKeyGenerator::new(config.clone())),
            validator: Arc::new(DefaultCacheValidator::new(config.clone())),
            response_builder: ResponseBuilder::new(manager.clone()),
            manager,
            config,
        }
    }

    pub fn with_key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CacheValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// Serve `request` through the cache, falling back to the plain downstream
    /// response on any cache fault
    pub async fn handle<F, Fut>(&self, request: &CacheRequest, ttl: Option<&str>, downstream: F) -> CacheResponse
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CacheResponse> + Send,
    {
        match self.try_handle(request, ttl, downstream).await {
            Ok(response) => response,
            Err(CacheFailure { error, downstream }) => {
                warn!(path = %request.path, error = %error, "Route cache failed, serving uncached response");
                let mut response = downstream().await;
                self.add_miss_headers(&mut response, request);
                response
            }
        }
    }

    /// Serve `request` through the cache, reporting faults instead of hiding them.
    ///
    /// Store failures after the downstream handler has run are logged and do
    /// not fail the request.
    pub async fn try_handle<F, Fut>(
        &self,
        request: &CacheRequest,
        ttl: Option<&str>,
        downstream: F,
    ) -> Result<CacheResponse, CacheFailure<F>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CacheResponse> + Send,
    {
        if !self.validator.is_enabled() || !self.validator.is_request_cacheable(request) {
            debug!(method = %request.method, path = %request.path, "Bypassing route cache");
            counter!("route_cache.bypass").increment(1);

            let mut response = downstream().await;
            self.set_status_header(&mut response, CacheStatus::Bypass);
            return Ok(response);
        }

        let key = self.key_generator.generate(request);
        let readable_key = self.key_generator.readable_key(request);

        match self.manager.get(&key).await {
            Ok(Some(entry)) => return Ok(self.serve_hit(&entry, &key, &readable_key).await),
            Ok(None) => {}
            Err(error) => return Err(CacheFailure { error, downstream }),
        }

        let ttl = self.resolve_ttl(ttl);

        if !self.config.lock.enabled {
            return Ok(self.compute(request, &key, ttl, true, downstream).await);
        }

        match self.acquire_or_wait(&key, self.lock_ttl_seconds(ttl)).await {
            LockOutcome::Acquired(token) => Ok(self.compute_locked(request, &key, ttl, &token, downstream).await),
            LockOutcome::Filled(entry) => Ok(self.serve_hit(&entry, &key, &readable_key).await),
            LockOutcome::Unavailable => Ok(self.compute(request, &key, ttl, true, downstream).await),
            LockOutcome::Exhausted => {
                info!(key = %readable_key, "Lock wait exhausted, computing without storing");
                counter!("route_cache.lock_wait_exhausted").increment(1);
                Ok(self.compute(request, &key, ttl, false, downstream).await)
            }
            LockOutcome::Failed(error) => Err(CacheFailure { error, downstream }),
        }
    }

    async fn serve_hit(&self, entry: &CacheEntry, key: &str, readable_key: &str) -> CacheResponse {
        debug!(key = %readable_key, "Route cache hit");
        counter!("route_cache.hit").increment(1);
        self.response_builder.build(entry, key, readable_key).await
    }

    async fn acquire_or_wait(&self, key: &str, lock_ttl: u64) -> LockOutcome {
        match self.manager.acquire_lock(key, lock_ttl).await {
            Ok(Some(token)) => return LockOutcome::Acquired(token),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Could not acquire cache lock, continuing without it");
                return LockOutcome::Unavailable;
            }
        }

        debug!(key, "Cache lock held elsewhere, waiting");

        let interval = self.config.lock.sleep.max(Duration::from_millis(1));
        let mut waited = Duration::ZERO;

        while waited < self.config.lock.wait {
            tokio::time::sleep(interval).await;
            waited += interval;

            match self.manager.get(key).await {
                Ok(Some(entry)) => return LockOutcome::Filled(entry),
                Ok(None) => {}
                Err(e) => return LockOutcome::Failed(e),
            }

            match self.manager.acquire_lock(key, lock_ttl).await {
                Ok(Some(token)) => return LockOutcome::Acquired(token),
                Ok(None) => {}
                Err(e) => return LockOutcome::Failed(e),
            }
        }

        LockOutcome::Exhausted
    }

    /// Compute while holding the lock, releasing it however the handler ends
    async fn compute_locked<F, Fut>(
        &self,
        request: &CacheRequest,
        key: &str,
        ttl: Option<Duration>,
        token: &str,
        downstream: F,
    ) -> CacheResponse
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CacheResponse> + Send,
    {
        let outcome = AssertUnwindSafe(self.compute(request, key, ttl, true, downstream))
            .catch_unwind()
            .await;

        match self.manager.release_lock(key, token).await {
            Ok(true) => {}
            Ok(false) => debug!(key, "Cache lock expired before release"),
            Err(e) => warn!(error = %e, "Failed to release cache lock"),
        }

        match outcome {
            Ok(response) => response,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn compute<F, Fut>(
        &self,
        request: &CacheRequest,
        key: &str,
        ttl: Option<Duration>,
        store: bool,
        downstream: F,
    ) -> CacheResponse
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CacheResponse> + Send,
    {
        counter!("route_cache.miss").increment(1);
        let mut response = downstream().await;

        if store && self.validator.is_response_cacheable(&response) {
            let stored = self.manager.put(key, &response, ttl);
            match stored.await {
                Ok(()) => {
                    counter!("route_cache.store").increment(1);
                    debug!(key, ttl = ?ttl, "Stored downstream response");
                }
                Err(e) => warn!(error = %e, "Failed to store response in route cache"),
            }
        }

        self.add_miss_headers(&mut response, request);
        response
    }

    /// Per-call TTL wins when it parses to a positive duration; anything else
    /// falls back to the configured default
    fn resolve_ttl(&self, ttl: Option<&str>) -> Option<Duration> {
        match ttl.map(parse_ttl) {
            Some(Ok(Some(ttl))) => Some(ttl),
            Some(Ok(None)) => self.config.effective_default_ttl(),
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring invalid route TTL");
                self.config.effective_default_ttl()
            }
            None => self.config.effective_default_ttl(),
        }
    }

    /// Lock TTL capped by the entry TTL, at least one second
    fn lock_ttl_seconds(&self, ttl: Option<Duration>) -> u64 {
        let lock_ttl = self.config.lock.ttl.as_secs();
        let capped = match ttl.map(|ttl| ttl.as_secs()).filter(|secs| *secs > 0) {
            Some(ttl) => lock_ttl.min(ttl),
            None => lock_ttl,
        };
        capped.max(1)
    }

    fn set_status_header(&self, response: &mut CacheResponse, status: CacheStatus) {
        if self.config.add_cache_headers {
            response.set_header(HEADER_CACHE_STATUS, status.as_str());
        }
    }

    fn add_miss_headers(&self, response: &mut CacheResponse, request: &CacheRequest) {
        if self.config.add_cache_headers {
            response.set_header(HEADER_CACHE_STATUS, CacheStatus::Miss.as_str());
            response.set_header(HEADER_CACHE_KEY, &self.key_generator.readable_key(request));
        }
    }
}
