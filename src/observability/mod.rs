//! # Observability Module
//!
//! Logging setup for the route cache binary. Counters are emitted through
//! the `metrics` facade at the call sites; installing a recorder is left to
//! the host application.

pub mod logging;

pub use logging::{build_env_filter, init_logging, LogFormat};
