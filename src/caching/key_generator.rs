//! # Cache Key Generator
//!
//! Derives the plain-text cache key for a request. The key is never used as a
//! storage address directly; [`CacheManager`](super::CacheManager) hashes it.
//!
//! Key layout: `METHOD:path[:query][:user_<id>]` where `query` holds the
//! parameters left after the ignore list, sorted by name and form-urlencoded.
//!
//! No segment can contain the `:` delimiter: the path has `%` and `:`
//! percent-encoded, the query and identity are form-urlencoded. A query
//! segment always contains `=`, an encoded identity never does, so a crafted
//! path or query cannot stand in for another user's key.

use crate::core::config::RouteCacheConfig;
use crate::core::types::CacheRequest;
use std::collections::HashSet;
use std::sync::Arc;

/// Percent-encode `%` and `:` so a path fits in one key segment
pub fn escape_path_segment(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Cache key generator trait
pub trait KeyGenerator: Send + Sync {
    /// Storage identity of a request
    fn generate(&self, request: &CacheRequest) -> String;

    /// Human-oriented identity (`prefix:METHOD:path`), used only in diagnostic headers
    fn readable_key(&self, request: &CacheRequest) -> String;
}

/// Default key generator implementation
#[derive(Debug, Clone)]
pub struct DefaultKeyGenerator {
    prefix: String,
    ignored_params: HashSet<String>,
}

impl DefaultKeyGenerator {
    pub fn new(config: Arc<RouteCacheConfig>) -> Self {
        Self {
            prefix: config.cache_key_prefix.clone(),
            ignored_params: config.ignore_query_params.iter().cloned().collect(),
        }
    }

    /// Query string of the non-ignored parameters sorted by name, `None` when nothing is left.
    ///
    /// The sort is stable, so repeated names keep their arrival order.
    fn filtered_query(&self, request: &CacheRequest) -> Option<String> {
        let mut params: Vec<&(String, String)> = request
            .query
            .iter()
            .filter(|(name, _)| !self.ignored_params.contains(name))
            .collect();

        if params.is_empty() {
            return None;
        }

        params.sort_by(|a, b| a.0.cmp(&b.0));

        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in params {
            serializer.append_pair(name, value);
        }
        Some(serializer.finish())
    }

    /// Path with outer slashes trimmed and runs of slashes collapsed
    fn normalized_path(request: &CacheRequest) -> String {
        request
            .path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl KeyGenerator for DefaultKeyGenerator {
    fn generate(&self, request: &CacheRequest) -> String {
        let mut components = vec![request.method.to_string(), escape_path_segment(request.route_path())];

        if let Some(query) = self.filtered_query(request) {
            components.push(query);
        }

        if let Some(identity) = &request.identity {
            let encoded: String = url::form_urlencoded::byte_serialize(identity.0.as_bytes()).collect();
            components.push(format!("user_{}", encoded));
        }

        components.join(":")
    }

    fn readable_key(&self, request: &CacheRequest) -> String {
        format!(
            "{}:{}:{}",
            self.prefix,
            request.method.as_str().to_ascii_uppercase(),
            Self::normalized_path(request)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn generator() -> DefaultKeyGenerator {
        DefaultKeyGenerator::new(Arc::new(RouteCacheConfig::default()))
    }

    #[test]
    fn test_simple_key_generation() {
        let request = CacheRequest::from_uri(Method::GET, "/api/users/123");
        assert_eq!(generator().generate(&request), "GET:api/users/123");
    }

    #[test]
    fn test_root_path() {
        let request = CacheRequest::from_uri(Method::GET, "/");
        assert_eq!(generator().generate(&request), "GET:/");
    }

    #[test]
    fn test_query_is_sorted() {
        let request = CacheRequest::from_uri(Method::GET, "/search?sort=name&page=2&q=rust lang");
        assert_eq!(generator().generate(&request), "GET:search:page=2&q=rust+lang&sort=name");
    }

    #[test]
    fn test_ignored_params_do_not_change_key() {
        let plain = CacheRequest::from_uri(Method::GET, "/blog?page=2");
        let tracked = CacheRequest::from_uri(Method::GET, "/blog?utm_source=mail&page=2&_=1699");

        assert_eq!(generator().generate(&plain), generator().generate(&tracked));
    }

    #[test]
    fn test_only_ignored_params_drop_query_segment() {
        let request = CacheRequest::from_uri(Method::GET, "/blog?utm_campaign=x");
        assert_eq!(generator().generate(&request), "GET:blog");
    }

    #[test]
    fn test_non_ignored_params_change_key() {
        let page_one = CacheRequest::from_uri(Method::GET, "/blog?page=1");
        let page_two = CacheRequest::from_uri(Method::GET, "/blog?page=2");

        assert_ne!(generator().generate(&page_one), generator().generate(&page_two));
    }

    #[test]
    fn test_custom_ignore_list() {
        let mut config = RouteCacheConfig::default();
        config.ignore_query_params = vec!["session".to_string()];
        let generator = DefaultKeyGenerator::new(Arc::new(config));

        let request = CacheRequest::from_uri(Method::GET, "/blog?session=abc&utm_source=x");
        assert_eq!(generator.generate(&request), "GET:blog:utm_source=x");
    }

    #[test]
    fn test_identity_segment() {
        let request = CacheRequest::from_uri(Method::GET, "/dashboard?tab=1").with_identity("42");
        assert_eq!(generator().generate(&request), "GET:dashboard:tab=1:user_42");

        let anonymous = CacheRequest::from_uri(Method::GET, "/dashboard?tab=1");
        assert_ne!(generator().generate(&request), generator().generate(&anonymous));
    }

    #[test]
    fn test_path_cannot_forge_identity_segment() {
        let owner = CacheRequest::from_uri(Method::GET, "/dashboard").with_identity("42");
        let forged = CacheRequest::from_uri(Method::GET, "/dashboard:user_42");

        assert_eq!(generator().generate(&forged), "GET:dashboard%3Auser_42");
        assert_ne!(generator().generate(&owner), generator().generate(&forged));
    }

    #[test]
    fn test_path_cannot_forge_query_segment() {
        let query = CacheRequest::from_uri(Method::GET, "/blog?page=2");
        let colon = CacheRequest::from_uri(Method::GET, "/blog:page=2");

        assert_ne!(generator().generate(&query), generator().generate(&colon));
    }

    #[test]
    fn test_query_cannot_forge_identity_segment() {
        let owner = CacheRequest::from_uri(Method::GET, "/dashboard").with_identity("42=");
        let forged = CacheRequest::from_uri(Method::GET, "/dashboard?user_42=");

        assert_eq!(generator().generate(&owner), "GET:dashboard:user_42%3D");
        assert_ne!(generator().generate(&owner), generator().generate(&forged));

        let colon_identity = CacheRequest::from_uri(Method::GET, "/dashboard").with_identity("1:2");
        assert_eq!(generator().generate(&colon_identity), "GET:dashboard:user_1%3A2");
    }

    #[test]
    fn test_escape_path_segment() {
        assert_eq!(escape_path_segment("blog/posts"), "blog/posts");
        assert_eq!(escape_path_segment("a:b"), "a%3Ab");
        assert_eq!(escape_path_segment("a%3Ab"), "a%253Ab");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = CacheRequest::from_uri(Method::GET, "/blog?b=2&a=1");
        let b = CacheRequest::from_uri(Method::GET, "/blog?a=1&b=2");

        let first = generator().generate(&a);
        assert_eq!(first, generator().generate(&a));
        assert_eq!(first, generator().generate(&b));
    }

    #[test]
    fn test_method_is_part_of_key() {
        let get = CacheRequest::from_uri(Method::GET, "/blog");
        let head = CacheRequest::from_uri(Method::HEAD, "/blog");
        assert_ne!(generator().generate(&get), generator().generate(&head));
    }

    #[test]
    fn test_readable_key() {
        let request = CacheRequest::from_uri(Method::GET, "//blog///posts/?page=2");
        assert_eq!(generator().readable_key(&request), "route_cache:GET:blog/posts");
        assert_ne!(generator().readable_key(&request), generator().generate(&request));
    }
}
