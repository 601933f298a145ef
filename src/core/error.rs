//! # Error Handling Module
//!
//! Crate-level error type for the route cache, built with `thiserror`.
//!
//! The cache subsystem itself reports failures through [`CacheError`]; those
//! never reach an end client because the coordinator fails open. The errors
//! defined here surface in two places only:
//! - startup (configuration loading and validation, store connection)
//! - the administrative API, where they are rendered as JSON error bodies
//!
//! [`CacheError`]: crate::caching::CacheError

use crate::caching::CacheError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the crate
pub type RouteCacheResult<T> = Result<T, RouteCacheError>;

/// Error categories for the route cache
#[derive(Debug, Error)]
pub enum RouteCacheError {
    /// Configuration-related errors (invalid values, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Failures reported by the cache subsystem
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Requested entry does not exist
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Internal errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl RouteCacheError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not found error with a custom message
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// HTTP status code used when the error is returned by the admin API
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Cache(CacheError::Timeout) | Self::Cache(CacheError::Unavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Cache(CacheError::Redis(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Cache(_) => "cache_error",
            Self::NotFound { .. } => "not_found",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<std::io::Error> for RouteCacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RouteCacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RouteCacheError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Render errors as structured JSON so admin clients can branch on `type`
impl IntoResponse for RouteCacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
