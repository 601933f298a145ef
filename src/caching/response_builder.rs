//! # Response Builder
//!
//! Rebuilds an outgoing response from a stored entry and layers the
//! diagnostic `X-Cache-*` headers on top.

use super::cache_manager::CacheManager;
use super::codec::{CacheEntry, DecodedResponse};
use crate::core::config::{HEADER_CACHED_AT, HEADER_CACHE_KEY, HEADER_CACHE_STATUS, HEADER_CACHE_TTL};
use crate::core::types::CacheResponse;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a cached body is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `application/json` content that parses as JSON
    Json,
    /// Anything else, served byte for byte
    Raw,
}

impl BodyKind {
    /// Sniff the stored content type, confirming JSON bodies actually parse
    pub fn detect(decoded: &DecodedResponse) -> Self {
        let is_json_type = decoded
            .headers
            .get(CONTENT_TYPE.as_str())
            .and_then(|values| values.first())
            .is_some_and(|content_type| content_type.contains("application/json"));

        if !is_json_type {
            return Self::Raw;
        }

        match serde_json::from_slice::<serde::de::IgnoredAny>(&decoded.body) {
            Ok(_) => Self::Json,
            Err(e) => {
                warn!(error = %e, "Cached body labelled as JSON does not parse, serving raw");
                Self::Raw
            }
        }
    }
}

/// Builds HIT responses
pub struct ResponseBuilder {
    manager: Arc<CacheManager>,
}

impl ResponseBuilder {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Decode `entry` into a response. `cache_key` addresses the entry for the
    /// TTL lookup; `readable_key` is what the diagnostic header shows.
    pub async fn build(&self, entry: &CacheEntry, cache_key: &str, readable_key: &str) -> CacheResponse {
        let decoded = self.manager.codec().decode(entry);
        let kind = BodyKind::detect(&decoded);

        let mut headers = HeaderMap::new();
        for (name, values) in &decoded.headers {
            let Some(first) = values.first() else { continue };
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(first)) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!(header = %name, "Skipping cached header that is not valid HTTP"),
            }
        }

        if kind == BodyKind::Json && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut response = CacheResponse::new(decoded.status, headers, decoded.body);

        if self.manager.config().add_cache_headers {
            response.set_header(HEADER_CACHE_STATUS, "HIT");
            response.set_header(HEADER_CACHE_KEY, readable_key);
            if !entry.cached_at.is_empty() {
                response.set_header(HEADER_CACHED_AT, &entry.cached_at);
            }

            match self.manager.ttl(cache_key).await {
                Ok(Some(ttl)) => response.set_header(HEADER_CACHE_TTL, &ttl.to_string()),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Could not read remaining TTL for cached entry"),
            }
        }

        response
    }
}
