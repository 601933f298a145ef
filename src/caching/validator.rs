//! # Cache Validator
//!
//! Policy gates: master switch, request eligibility (method and exclusion
//! globs) and response eligibility (body shape and status).

use crate::core::config::{glob_to_regex, RouteCacheConfig};
use crate::core::types::{CacheRequest, CacheResponse, ResponseBody};
use axum::http::Method;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

/// Cacheability policy
pub trait CacheValidator: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn is_request_cacheable(&self, request: &CacheRequest) -> bool;

    fn is_response_cacheable(&self, response: &CacheResponse) -> bool;
}

/// One `exclude_urls` entry
#[derive(Debug, Clone)]
enum ExclusionPattern {
    /// No wildcard: exact comparison only
    Exact(String),
    /// Single trailing `*`: prefix test, empty prefix matches everything
    Prefix(String),
    /// Wildcards elsewhere: anchored regex
    Glob { raw: String, regex: Regex },
}

impl ExclusionPattern {
    fn compile(pattern: &str) -> Option<Self> {
        if !pattern.contains('*') {
            return Some(Self::Exact(pattern.to_string()));
        }

        if let Some(prefix) = pattern.strip_suffix('*') {
            let prefix = prefix.trim_end_matches('*');
            if !prefix.contains('*') {
                return Some(Self::Prefix(prefix.to_string()));
            }
        }

        match Regex::new(&glob_to_regex(pattern)) {
            Ok(regex) => Some(Self::Glob {
                raw: pattern.to_string(),
                regex,
            }),
            Err(e) => {
                warn!(pattern, error = %e, "Ignoring exclusion pattern that does not compile");
                None
            }
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Glob { raw, regex } => path == raw || regex.is_match(path),
        }
    }
}

/// Config-driven validator with exclusion patterns compiled up front
#[derive(Debug, Clone)]
pub struct DefaultCacheValidator {
    config: Arc<RouteCacheConfig>,
    exclusions: Vec<ExclusionPattern>,
}

impl DefaultCacheValidator {
    pub fn new(config: Arc<RouteCacheConfig>) -> Self {
        let exclusions = config
            .exclude_urls
            .iter()
            .filter_map(|pattern| ExclusionPattern::compile(pattern))
            .collect();

        Self { config, exclusions }
    }

    /// Whether a route path (no leading slash) is excluded
    pub fn is_url_excluded(&self, path: &str) -> bool {
        self.exclusions.iter().any(|pattern| pattern.matches(path))
    }
}

impl CacheValidator for DefaultCacheValidator {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn is_request_cacheable(&self, request: &CacheRequest) -> bool {
        let method_allowed = request.method == Method::GET
            || (self.config.cache_head_requests && request.method == Method::HEAD);

        method_allowed && !self.is_url_excluded(request.route_path())
    }

    fn is_response_cacheable(&self, response: &CacheResponse) -> bool {
        if !matches!(response.body, ResponseBody::Buffered(_)) {
            return false;
        }

        let status = response.status.as_u16();
        if self.config.cache_only_success {
            (200..300).contains(&status)
        } else {
            self.config.cacheable_status_codes.contains(&status)
        }
    }
}
