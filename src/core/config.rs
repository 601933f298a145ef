//! # Configuration Management
//!
//! Configuration for the route cache is an explicit value: it is loaded once
//! (YAML or JSON file, then environment overrides), validated, wrapped in an
//! `Arc` and handed to each component's constructor. Nothing reads settings
//! through a global lookup.
//!
//! Durations use `humantime` notation in files (`"10s"`, `"50ms"`, `"1h"`).

use crate::core::error::{RouteCacheError, RouteCacheResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// HTTP status codes treated as cacheable when `cache_only_success` is off
pub const SUCCESS_STATUS_CODES: [u16; 7] = [200, 201, 202, 203, 204, 205, 206];

/// Response headers never written to the store
pub const EXCLUDED_HEADERS: [&str; 4] = ["set-cookie", "cookie", "authorization", "x-csrf-token"];

/// Diagnostic header names
pub const HEADER_CACHE_STATUS: &str = "x-cache-status";
pub const HEADER_CACHE_KEY: &str = "x-cache-key";
pub const HEADER_CACHED_AT: &str = "x-cached-at";
pub const HEADER_CACHE_TTL: &str = "x-cache-ttl";

/// Root configuration for the route cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteCacheConfig {
    /// Master switch
    pub enabled: bool,

    /// Which backend holds the entries
    pub store: StoreKind,

    /// TTL applied when a route does not set one. `None` or zero means no expiry.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,

    /// Query parameters dropped before key generation
    pub ignore_query_params: Vec<String>,

    /// Cache only 2xx responses
    pub cache_only_success: bool,

    /// Explicit status allow-list, consulted when `cache_only_success` is off
    pub cacheable_status_codes: Vec<u16>,

    /// Glob patterns (`*` wildcard) matched against the request path without its leading slash
    pub exclude_urls: Vec<String>,

    /// Emit `X-Cache-*` diagnostic headers
    pub add_cache_headers: bool,

    /// Bodies strictly larger than this many bytes are stored compressed
    pub compression_threshold: usize,

    /// Namespace mixed into every hashed storage address
    pub cache_key_prefix: String,

    /// Treat HEAD like GET for eligibility
    pub cache_head_requests: bool,

    /// Largest downstream body that is buffered for caching
    pub max_body_size: usize,

    /// Stampede lock settings
    pub lock: LockConfig,

    /// Redis connection settings
    pub redis: RedisSettings,

    /// Admin API server settings
    pub server: ServerSettings,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Redis,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = RouteCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(RouteCacheError::config(format!("Unknown store kind: {}", other))),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Stampede protection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Use a distributed lock so only one request recomputes a missing entry
    pub enabled: bool,

    /// Lock expiry (whole seconds are used)
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How long a waiter polls before computing on its own
    #[serde(with = "humantime_serde")]
    pub wait: Duration,

    /// Poll interval while waiting
    #[serde(with = "humantime_serde")]
    pub sleep: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(10),
            wait: Duration::from_millis(3000),
            sleep: Duration::from_millis(50),
        }
    }
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,

    /// Transport namespace prepended to every stored key
    pub key_prefix: String,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Per-command timeout
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Maximum number of retries per command
    pub max_retries: u32,

    /// Base delay between retries
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "route_cache:".to_string(),
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(1),
            max_retries: 2,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Admin API server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8089".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for RouteCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreKind::Redis,
            default_ttl: Some(Duration::from_secs(3600)),
            ignore_query_params: ["_", "utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cache_only_success: true,
            cacheable_status_codes: SUCCESS_STATUS_CODES.to_vec(),
            exclude_urls: vec!["api/admin/*".to_string(), "api/auth/*".to_string()],
            add_cache_headers: true,
            compression_threshold: 1024,
            cache_key_prefix: "route_cache".to_string(),
            cache_head_requests: false,
            max_body_size: 10 * 1024 * 1024,
            lock: LockConfig::default(),
            redis: RedisSettings::default(),
            server: ServerSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RouteCacheConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> RouteCacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RouteCacheError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: RouteCacheConfig = serde_yaml::from_str(&content)
            .map_err(|e| RouteCacheError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> RouteCacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RouteCacheError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: RouteCacheConfig = serde_json::from_str(&content)
            .map_err(|e| RouteCacheError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Variables follow the pattern `ROUTE_CACHE_<FIELD>`, e.g. `ROUTE_CACHE_TTL=600`.
    pub fn apply_env_overrides(&mut self) -> RouteCacheResult<()> {
        use std::env;

        if let Ok(enabled) = env::var("ROUTE_CACHE_ENABLED") {
            self.enabled = parse_bool("ROUTE_CACHE_ENABLED", &enabled)?;
        }

        if let Ok(ttl) = env::var("ROUTE_CACHE_TTL") {
            self.default_ttl = parse_ttl(&ttl)
                .map_err(|e| RouteCacheError::config(format!("Invalid ROUTE_CACHE_TTL: {}", e)))?;
        }

        if let Ok(store) = env::var("ROUTE_CACHE_STORE") {
            self.store = store.parse()?;
        }

        if let Ok(prefix) = env::var("ROUTE_CACHE_KEY_PREFIX") {
            self.cache_key_prefix = prefix;
        }

        if let Ok(add) = env::var("ROUTE_CACHE_ADD_HEADERS") {
            self.add_cache_headers = parse_bool("ROUTE_CACHE_ADD_HEADERS", &add)?;
        }

        if let Ok(only) = env::var("ROUTE_CACHE_ONLY_SUCCESS") {
            self.cache_only_success = parse_bool("ROUTE_CACHE_ONLY_SUCCESS", &only)?;
        }

        // Lock overrides
        if let Ok(enabled) = env::var("ROUTE_CACHE_LOCK_ENABLED") {
            self.lock.enabled = parse_bool("ROUTE_CACHE_LOCK_ENABLED", &enabled)?;
        }

        if let Ok(ttl) = env::var("ROUTE_CACHE_LOCK_TTL") {
            self.lock.ttl = parse_duration("ROUTE_CACHE_LOCK_TTL", &ttl, Duration::from_secs)?;
        }

        if let Ok(wait) = env::var("ROUTE_CACHE_LOCK_WAIT") {
            self.lock.wait = parse_duration("ROUTE_CACHE_LOCK_WAIT", &wait, Duration::from_millis)?;
        }

        if let Ok(sleep) = env::var("ROUTE_CACHE_LOCK_SLEEP") {
            self.lock.sleep = parse_duration("ROUTE_CACHE_LOCK_SLEEP", &sleep, Duration::from_millis)?;
        }

        // Redis overrides
        if let Ok(url) = env::var("ROUTE_CACHE_REDIS_URL") {
            self.redis.url = url;
        }

        if let Ok(prefix) = env::var("ROUTE_CACHE_REDIS_PREFIX") {
            self.redis.key_prefix = prefix;
        }

        // Logging and server overrides
        if let Ok(level) = env::var("ROUTE_CACHE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("ROUTE_CACHE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(addr) = env::var("ROUTE_CACHE_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> RouteCacheResult<()> {
        let mut errors = Vec::new();

        for code in &self.cacheable_status_codes {
            if !(100..=599).contains(code) {
                errors.push(format!("Invalid HTTP status code: {}", code));
            }
        }

        for pattern in &self.exclude_urls {
            if pattern.is_empty() {
                errors.push("exclude_urls cannot contain an empty pattern".to_string());
            } else if let Err(e) = Regex::new(&glob_to_regex(pattern)) {
                errors.push(format!("Invalid exclude pattern '{}': {}", pattern, e));
            }
        }

        if self.cache_key_prefix.is_empty() {
            errors.push("cache_key_prefix cannot be empty".to_string());
        }

        if self.lock.ttl.as_secs() == 0 {
            errors.push("lock.ttl must be at least 1 second".to_string());
        }

        if self.lock.sleep.is_zero() {
            errors.push("lock.sleep must be greater than 0".to_string());
        }

        if self.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        if self.store == StoreKind::Redis {
            if self.redis.url.is_empty() {
                errors.push("redis.url is required".to_string());
            } else {
                match url::Url::parse(&self.redis.url) {
                    Ok(parsed) if matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix" | "unix") => {}
                    Ok(parsed) => errors.push(format!("Unsupported redis URL scheme: {}", parsed.scheme())),
                    Err(e) => errors.push(format!("Invalid redis.url: {}", e)),
                }
            }

            if self.redis.operation_timeout.is_zero() {
                errors.push("redis.operation_timeout must be greater than 0".to_string());
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => errors.push(format!("Unknown logging format: {}", other)),
        }

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RouteCacheError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }

    /// Default TTL with the zero value folded into "no expiry"
    pub fn effective_default_ttl(&self) -> Option<Duration> {
        self.default_ttl.filter(|ttl| ttl.as_secs() > 0)
    }
}

/// Configuration validation utilities
pub struct ConfigValidator;

impl ConfigValidator {
    /// Load and validate a configuration file, picking the parser by extension
    pub async fn validate_file<P: AsRef<Path>>(path: P) -> RouteCacheResult<RouteCacheConfig> {
        if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") {
            RouteCacheConfig::load_from_json(path).await
        } else {
            RouteCacheConfig::load_from_file(path).await
        }
    }

    /// Non-failing form of [`RouteCacheConfig::validate`]
    pub fn is_valid(config: &RouteCacheConfig) -> bool {
        config.validate().is_ok()
    }
}

/// Translate an exclusion glob into an anchored regular expression
pub fn glob_to_regex(pattern: &str) -> String {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    format!("^{}$", escaped.join(".*"))
}

/// Parse a TTL given as whole seconds or a humantime duration.
///
/// Zero and `none` mean "no expiry".
pub fn parse_ttl(value: &str) -> Result<Option<Duration>, String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    let ttl = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(value).map_err(|e| e.to_string())?,
    };

    Ok(Some(ttl).filter(|d| d.as_secs() > 0))
}

fn parse_bool(name: &str, value: &str) -> RouteCacheResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RouteCacheError::config(format!("Invalid {}: {}", name, other))),
    }
}

/// Bare integers use `unit`; anything else goes through humantime
fn parse_duration(name: &str, value: &str, unit: fn(u64) -> Duration) -> RouteCacheResult<Duration> {
    let value = value.trim();
    if let Ok(n) = value.parse::<u64>() {
        return Ok(unit(n));
    }
    humantime::parse_duration(value)
        .map_err(|e| RouteCacheError::config(format!("Invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // loaders read the environment, so env-mutating tests must not interleave with them
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config_validation() {
        let config = RouteCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_default_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.lock.ttl, Duration::from_secs(10));
        assert_eq!(config.lock.wait, Duration::from_millis(3000));
        assert_eq!(config.lock.sleep, Duration::from_millis(50));
    }

    #[test]
    fn test_config_serialization_yaml() {
        let config = RouteCacheConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: RouteCacheConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(config.default_ttl, deserialized.default_ttl);
        assert_eq!(config.exclude_urls, deserialized.exclude_urls);
        assert_eq!(config.lock.sleep, deserialized.lock.sleep);
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("route-cache.yaml");

        let config_content = r#"
enabled: true
store: memory
default_ttl: 10m
exclude_urls:
  - "internal/*"
compression_threshold: 2048
lock:
  enabled: false
  ttl: 5s
  wait: 1s
  sleep: 25ms
logging:
  format: json
"#;
        tokio::fs::write(&config_path, config_content).await.unwrap();

        let config = RouteCacheConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.exclude_urls, vec!["internal/*".to_string()]);
        assert_eq!(config.compression_threshold, 2048);
        assert!(!config.lock.enabled);
        assert_eq!(config.lock.sleep, Duration::from_millis(25));
        assert_eq!(config.logging.format, "json");
        // untouched fields keep their defaults
        assert!(config.cache_only_success);
        assert_eq!(config.cache_key_prefix, "route_cache");
    }

    #[tokio::test]
    async fn test_load_config_from_json_file() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("route-cache.json");

        let config_content = r#"{
            "store": "memory",
            "default_ttl": null,
            "cache_only_success": false,
            "cacheable_status_codes": [200, 404]
        }"#;
        tokio::fs::write(&config_path, config_content).await.unwrap();

        let config = ConfigValidator::validate_file(&config_path).await.unwrap();
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.effective_default_ttl(), None);
        assert_eq!(config.cacheable_status_codes, vec![200, 404]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = RouteCacheConfig::load_from_file("/definitely/not/here.yaml").await;
        assert!(result.unwrap_err().to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_environment_variable_overrides() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("ROUTE_CACHE_TTL", "120");
        env::set_var("ROUTE_CACHE_LOCK_WAIT", "500");
        env::set_var("ROUTE_CACHE_LOCK_SLEEP", "10ms");
        env::set_var("ROUTE_CACHE_REDIS_PREFIX", "rc_test:");

        let mut config = RouteCacheConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.default_ttl, Some(Duration::from_secs(120)));
        assert_eq!(config.lock.wait, Duration::from_millis(500));
        assert_eq!(config.lock.sleep, Duration::from_millis(10));
        assert_eq!(config.redis.key_prefix, "rc_test:");

        env::remove_var("ROUTE_CACHE_TTL");
        env::remove_var("ROUTE_CACHE_LOCK_WAIT");
        env::remove_var("ROUTE_CACHE_LOCK_SLEEP");
        env::remove_var("ROUTE_CACHE_REDIS_PREFIX");
    }

    #[test]
    fn test_invalid_environment_variables() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("ROUTE_CACHE_LOCK_ENABLED", "maybe");

        let mut config = RouteCacheConfig::default();
        let result = config.apply_env_overrides();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid ROUTE_CACHE_LOCK_ENABLED"));

        env::remove_var("ROUTE_CACHE_LOCK_ENABLED");
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = RouteCacheConfig::default();
        config.cacheable_status_codes = vec![200, 42, 700];
        config.lock.sleep = Duration::ZERO;
        config.redis.url = "http://localhost".to_string();
        config.logging.format = "xml".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid HTTP status code: 42"));
        assert!(err.contains("Invalid HTTP status code: 700"));
        assert!(err.contains("lock.sleep"));
        assert!(err.contains("Unsupported redis URL scheme"));
        assert!(err.contains("Unknown logging format"));
        assert!(!ConfigValidator::is_valid(&config));
    }

    #[test]
    fn test_memory_store_skips_redis_validation() {
        let mut config = RouteCacheConfig::default();
        config.store = StoreKind::Memory;
        config.redis.url = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl("600").unwrap(), Some(Duration::from_secs(600)));
        assert_eq!(parse_ttl("2m").unwrap(), Some(Duration::from_secs(120)));
        assert_eq!(parse_ttl("0").unwrap(), None);
        assert_eq!(parse_ttl("none").unwrap(), None);
        assert!(parse_ttl("soon").is_err());
    }

    #[test]
    fn test_glob_to_regex() {
        let re = Regex::new(&glob_to_regex("api/*/users")).unwrap();
        assert!(re.is_match("api/v1/users"));
        assert!(!re.is_match("api/v1/users/2"));

        let dotted = Regex::new(&glob_to_regex("files/*.json")).unwrap();
        assert!(dotted.is_match("files/a.json"));
        assert!(!dotted.is_match("files/ajson"));
    }
}
