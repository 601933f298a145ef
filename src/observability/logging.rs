//! # Structured Logging
//!
//! `tracing-subscriber` initialisation driven by [`LoggingConfig`]. `RUST_LOG`
//! takes precedence over the configured level.

use crate::core::config::LoggingConfig;
use crate::core::error::{RouteCacheError, RouteCacheResult};
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = RouteCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(RouteCacheError::config(format!("Unknown log format: {}", other))),
        }
    }
}

/// `RUST_LOG` if set and valid, otherwise the configured level
pub fn build_env_filter(config: &LoggingConfig) -> RouteCacheResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level)
        .map_err(|e| RouteCacheError::config(format!("Invalid log level '{}': {}", config.level, e)))
}

/// Install the global subscriber. A second call leaves the first one in place.
pub fn init_logging(config: &LoggingConfig) -> RouteCacheResult<()> {
    let format: LogFormat = config.format.parse()?;
    let env_filter = build_env_filter(config)?;

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    Ok(())
}
