//! Request and response shapes seen by the cache core.
//!
//! The core never touches a live framework request. The HTTP layer extracts a
//! [`CacheRequest`] up front and converts downstream output into a
//! [`CacheResponse`], which is also what the cache hands back.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

/// Authenticated subject attached to a request by the host's auth layer.
///
/// Insert it as a request extension; the cache keys per-user variants on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity(pub String);

/// Read-only view of an incoming request
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    /// Raw URI path, leading slash included
    pub path: String,
    /// Decoded query pairs in arrival order
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub identity: Option<CacheIdentity>,
}

impl CacheRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            identity: None,
        }
    }

    /// Build from a method and a path-and-query string such as `/blog?page=2`
    pub fn from_uri(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut request = Self::new(method, path);
        if let Some(query) = query {
            request.query = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
        }
        request
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(CacheIdentity(identity.into()));
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Framework-style path: outer slashes trimmed, `/` for the root
    pub fn route_path(&self) -> &str {
        let trimmed = self.path.trim_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }
}

/// Response body as produced downstream
#[derive(Debug)]
pub enum ResponseBody {
    /// Fully buffered body; the only shape the cache will store
    Buffered(Bytes),
    /// Unsized or oversized body passed through untouched
    Streaming(Body),
}

/// Response flowing through the cache
#[derive(Debug)]
pub struct CacheResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl CacheResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(body.into()),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::new(status, headers, body.into())
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, value.to_string())
    }

    pub fn streaming(status: StatusCode, headers: HeaderMap, body: Body) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Streaming(body),
        }
    }

    /// Buffered body bytes, if the body was buffered
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            ResponseBody::Streaming(_) => None,
        }
    }

    /// Set a header, silently skipping values that are not valid header text
    pub fn set_header(&mut self, name: &'static str, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for CacheResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            ResponseBody::Buffered(bytes) => Body::from(bytes),
            ResponseBody::Streaming(body) => body,
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
