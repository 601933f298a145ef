//! # Cache Middleware
//!
//! axum integration: extracts a [`CacheRequest`], runs the coordinator with the
//! rest of the stack as the downstream handler, and buffers downstream bodies
//! whose size is known and within `max_body_size`. Anything else streams
//! through uncached.
//!
//! ```rust,ignore
//! // one cache layer per route; stacking `.layer` calls would nest them
//! let app = Router::new()
//!     .route("/blog", get(blog).route_layer(cache_layer_with_ttl(coordinator.clone(), "10m")))
//!     .route("/", get(home).route_layer(cache_layer(coordinator)));
//! ```

use super::coordinator::CacheCoordinator;
use crate::core::types::{CacheIdentity, CacheRequest, CacheResponse};
use axum::body::HttpBody;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, FromFnLayer, Next};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::warn;

/// State carried by the cache layer
#[derive(Clone)]
pub struct CacheLayerState {
    coordinator: Arc<CacheCoordinator>,
    ttl: Option<Arc<str>>,
}

impl CacheLayerState {
    pub fn new(coordinator: Arc<CacheCoordinator>) -> Self {
        Self { coordinator, ttl: None }
    }

    /// Per-route TTL in seconds or humantime notation; invalid values fall back to the default
    pub fn with_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.ttl = Some(Arc::from(ttl.into()));
        self
    }
}

type CacheMiddlewareFn = fn(State<CacheLayerState>, Request, Next) -> BoxFuture<'static, Response>;

/// Layer type returned by [`cache_layer`]
pub type CacheLayer = FromFnLayer<CacheMiddlewareFn, CacheLayerState, (State<CacheLayerState>, Request)>;

/// Cache layer using the configured default TTL
pub fn cache_layer(coordinator: Arc<CacheCoordinator>) -> CacheLayer {
    from_fn_with_state(CacheLayerState::new(coordinator), boxed_cache_middleware as CacheMiddlewareFn)
}

/// Cache layer with a route-specific TTL such as `"600"` or `"10m"`
pub fn cache_layer_with_ttl(coordinator: Arc<CacheCoordinator>, ttl: impl Into<String>) -> CacheLayer {
    from_fn_with_state(
        CacheLayerState::new(coordinator).with_ttl(ttl),
        boxed_cache_middleware as CacheMiddlewareFn,
    )
}

fn boxed_cache_middleware(state: State<CacheLayerState>, request: Request, next: Next) -> BoxFuture<'static, Response> {
    Box::pin(cache_middleware(state, request, next))
}

/// Middleware function, usable directly with `from_fn_with_state`
pub async fn cache_middleware(State(state): State<CacheLayerState>, request: Request, next: Next) -> Response {
    let cache_request = extract_cache_request(&request);
    let max_body_size = state.coordinator.manager().config().max_body_size;

    state
        .coordinator
        .handle(&cache_request, state.ttl.as_deref(), move || async move {
            let response = next.run(request).await;
            buffer_response(response, max_body_size).await
        })
        .await
        .into_response()
}

/// Read-only view of an axum request
pub fn extract_cache_request(request: &Request) -> CacheRequest {
    let uri = request.uri();

    let mut cache_request = CacheRequest::new(request.method().clone(), uri.path());
    if let Some(query) = uri.query() {
        cache_request.query = url::form_urlencoded::parse(query.as_bytes()).into_owned().collect();
    }
    cache_request.headers = request.headers().clone();
    cache_request.identity = request.extensions().get::<CacheIdentity>().cloned();

    cache_request
}

/// Buffer bodies with a known size within `max_body_size`; stream the rest
pub async fn buffer_response(response: Response, max_body_size: usize) -> CacheResponse {
    let (parts, body) = response.into_parts();

    let fits = body
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= max_body_size as u64);

    if !fits {
        return CacheResponse::streaming(parts.status, parts.headers, body);
    }

    match axum::body::to_bytes(body, max_body_size).await {
        Ok(bytes) => CacheResponse::new(parts.status, parts.headers, bytes),
        Err(e) => {
            warn!(error = %e, "Failed to read downstream response body");
            CacheResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read response body")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{CacheManager, InMemoryCache};
    use crate::core::config::{RouteCacheConfig, HEADER_CACHE_STATUS, HEADER_CACHE_TTL};
    use crate::core::types::ResponseBody;
    use axum::body::{Body, Bytes};
    use axum::http::Method;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn coordinator_with(configure: impl FnOnce(&mut RouteCacheConfig)) -> Arc<CacheCoordinator> {
        let mut config = RouteCacheConfig::default();
        configure(&mut config);
        let config = Arc::new(config);
        let manager = Arc::new(CacheManager::new(Arc::new(InMemoryCache::new()), config.clone()));
        Arc::new(CacheCoordinator::new(manager, config))
    }

    fn counted_router(layer: CacheLayer, calls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/blog",
                get(move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        "posts"
                    }
                }),
            )
            .layer(layer)
    }

    async fn send(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_layer_serves_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counted_router(cache_layer(coordinator_with(|_| {})), calls.clone());

        let first = send(&app, "/blog").await;
        assert_eq!(first.headers()[HEADER_CACHE_STATUS], "MISS");

        let second = send(&app, "/blog?utm_source=feed").await;
        assert_eq!(second.headers()[HEADER_CACHE_STATUS], "HIT");
        let body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"posts");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_layer_with_route_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counted_router(cache_layer_with_ttl(coordinator_with(|_| {}), "90"), calls);

        send(&app, "/blog").await;
        let hit = send(&app, "/blog").await;

        let ttl: u64 = hit.headers()[HEADER_CACHE_TTL].to_str().unwrap().parse().unwrap();
        assert!(ttl <= 90 && ttl > 0);
    }

    #[tokio::test]
    async fn test_route_layers_apply_one_ttl_per_route() {
        let coordinator = coordinator_with(|_| {});
        let app = Router::new()
            .route("/blog", get(|| async { "posts" }).route_layer(cache_layer_with_ttl(coordinator.clone(), "90")))
            .route("/", get(|| async { "home" }).route_layer(cache_layer(coordinator)));

        send(&app, "/blog").await;
        send(&app, "/").await;

        let blog = send(&app, "/blog").await;
        assert_eq!(blog.headers()[HEADER_CACHE_STATUS], "HIT");
        let blog_ttl: u64 = blog.headers()[HEADER_CACHE_TTL].to_str().unwrap().parse().unwrap();
        assert!(blog_ttl <= 90 && blog_ttl > 0);

        let home = send(&app, "/").await;
        assert_eq!(home.headers()[HEADER_CACHE_STATUS], "HIT");
        let home_ttl: u64 = home.headers()[HEADER_CACHE_TTL].to_str().unwrap().parse().unwrap();
        assert!(home_ttl > 90);
    }

    #[tokio::test]
    async fn test_oversized_body_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counted_router(cache_layer(coordinator_with(|c| c.max_body_size = 3)), calls.clone());

        for _ in 0..2 {
            let response = send(&app, "/blog").await;
            assert_eq!(response.headers()[HEADER_CACHE_STATUS], "MISS");
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], b"posts");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_buffer_response_streams_unsized_bodies() {
        let chunks = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("chunk"))]);
        let response = Response::new(Body::from_stream(chunks));

        let buffered = buffer_response(response, 1024).await;
        assert!(matches!(buffered.body, ResponseBody::Streaming(_)));

        let sized = buffer_response(Response::new(Body::from("ok")), 1024).await;
        assert_eq!(&sized.bytes().unwrap()[..], b"ok");
    }

    #[test]
    fn test_extract_cache_request() {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri("/search?q=rust&page=2")
            .header("accept", "text/html")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(CacheIdentity("7".to_string()));

        let extracted = extract_cache_request(&request);
        assert_eq!(extracted.path, "/search");
        assert_eq!(extracted.query.len(), 2);
        assert_eq!(extracted.identity, Some(CacheIdentity("7".to_string())));
        assert_eq!(extracted.headers["accept"], "text/html");
    }
}
