//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching
//! config/default.toml. Every section is optional and falls back to defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::adapters::marketplace::MarketplaceConfig;
use crate::application::AggregatorConfig;
use crate::domain::{CircuitBreakerConfig, RateLimitConfig, RetryPolicy, SubResource, WindowLimit};

/// Environment variable overriding `[marketplace].api_key`
pub const API_KEY_ENV: &str = "MARKETPLACE_API_KEY";

/// Environment variable overriding `[marketplace].api_url`
pub const API_URL_ENV: &str = "MARKETPLACE_API_URL";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure matching config/default.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub marketplace: MarketplaceSection,
    pub rate_limit: RateLimitSection,
    pub circuit_breaker: CircuitBreakerSection,
    pub retry: RetrySection,
    pub cache: CacheSection,
    pub aggregator: AggregatorSection,
    pub output: OutputSection,
    pub logging: LoggingSection,
}

/// Marketplace API configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceSection {
    /// API base URL
    pub api_url: String,
    /// API key (prefer MARKETPLACE_API_KEY over committing it)
    pub api_key: Option<String>,
    /// Per-request transport timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MarketplaceSection {
    fn default() -> Self {
        let defaults = MarketplaceConfig::default();
        Self {
            api_url: defaults.api_url,
            api_key: None,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl MarketplaceSection {
    /// Get API URL with environment variable override
    pub fn get_api_url(&self) -> String {
        self.api_url_with(std::env::var(API_URL_ENV).ok())
    }

    /// Get API key with environment variable override
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key_with(std::env::var(API_KEY_ENV).ok())
    }

    fn api_url_with(&self, env_value: Option<String>) -> String {
        env_value
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.api_url.clone())
    }

    fn api_key_with(&self, env_value: Option<String>) -> Option<String> {
        env_value
            .or_else(|| self.api_key.clone())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Window override for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimitSection {
    pub window_capacity: u32,
    pub window_ms: u64,
}

/// Rate limiter configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Permits per window for every endpoint without an override
    pub window_capacity: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Per-endpoint overrides keyed by endpoint name ("stats", "sales", ...)
    pub endpoints: BTreeMap<String, EndpointLimitSection>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = WindowLimit::default();
        Self {
            window_capacity: defaults.capacity,
            window_ms: defaults.window.as_millis() as u64,
            endpoints: BTreeMap::new(),
        }
    }
}

/// Circuit breaker configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    /// Terminal failures before the circuit opens
    pub failure_threshold: u32,
    /// Cooldown before a trial call, in seconds
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            reset_timeout_secs: defaults.reset_timeout.as_secs(),
        }
    }
}

/// Retry policy configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts per request, first try included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
    /// Wait after a 429 that carries no Retry-After header
    pub default_retry_after_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            max_jitter_ms: defaults.max_jitter.as_millis() as u64,
            default_retry_after_secs: defaults.default_retry_after.as_secs(),
        }
    }
}

/// Cache lifetimes section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Complete composite records
    pub composite_ttl_secs: u64,
    /// Composite records with partial failures
    pub partial_ttl_secs: u64,
    /// Individual sub-resource payloads
    pub resource_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = AggregatorConfig::default();
        Self {
            composite_ttl_secs: defaults.composite_ttl.as_secs(),
            partial_ttl_secs: defaults.partial_ttl.as_secs(),
            resource_ttl_secs: defaults.resource_ttl.as_secs(),
        }
    }
}

/// Aggregator configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    /// Deadline per sub-fetch in milliseconds
    pub sub_fetch_timeout_ms: u64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            sub_fetch_timeout_ms: AggregatorConfig::default().sub_fetch_timeout.as_millis() as u64,
        }
    }
}

/// Record output section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Directory for JSON snapshots of finished records (disabled when unset)
    pub snapshot_dir: Option<String>,
}

impl OutputSection {
    /// Snapshot directory with `~` and `$VARS` expanded
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot_dir
            .as_deref()
            .map(expand_path)
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Marketplace
        let url = self.marketplace.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_url must be an http(s) URL, got '{}'",
                self.marketplace.api_url
            )));
        }

        if self.marketplace.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        // Rate limiting
        validate_window("rate_limit", self.rate_limit.window_capacity, self.rate_limit.window_ms)?;

        for (name, limit) in &self.rate_limit.endpoints {
            if !SubResource::ALL.iter().any(|r| r.endpoint_key() == name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "unknown rate_limit endpoint '{}'",
                    name
                )));
            }
            validate_window(&format!("rate_limit.endpoints.{}", name), limit.window_capacity, limit.window_ms)?;
        }

        // Circuit breaker
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be > 0".to_string(),
            ));
        }

        // Retry
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be >= 1".to_string(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        // Cache
        if self.cache.composite_ttl_secs == 0 || self.cache.resource_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache TTLs must be > 0".to_string(),
            ));
        }

        if self.cache.partial_ttl_secs > self.cache.composite_ttl_secs {
            return Err(ConfigError::ValidationError(format!(
                "partial_ttl_secs ({}) must not exceed composite_ttl_secs ({})",
                self.cache.partial_ttl_secs, self.cache.composite_ttl_secs
            )));
        }

        // Aggregator
        if self.aggregator.sub_fetch_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sub_fetch_timeout_ms must be > 0".to_string(),
            ));
        }

        // Logging
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.logging.level
            )));
        }

        Ok(())
    }

    /// Marketplace client settings, with environment overrides applied
    pub fn marketplace_config(&self) -> MarketplaceConfig {
        MarketplaceConfig {
            api_url: self.marketplace.get_api_url(),
            api_key: self.marketplace.get_api_key(),
            timeout: Duration::from_secs(self.marketplace.timeout_secs),
        }
    }

    /// Copy suitable for display, with secrets masked
    pub fn redacted(&self) -> Config {
        let mut config = self.clone();
        config.marketplace.api_key = self
            .marketplace
            .get_api_key()
            .map(|_| "<redacted>".to_string());
        config.marketplace.api_url = self.marketplace.get_api_url();
        config
    }
}

fn validate_window(section: &str, capacity: u32, window_ms: u64) -> Result<(), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.window_capacity must be > 0",
            section
        )));
    }
    if window_ms == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.window_ms must be > 0",
            section
        )));
    }
    Ok(())
}

impl From<&RateLimitSection> for RateLimitConfig {
    fn from(section: &RateLimitSection) -> Self {
        section.endpoints.iter().fold(
            RateLimitConfig::new(section.window_capacity, Duration::from_millis(section.window_ms)),
            |config, (name, limit)| {
                config.with_override(
                    name.clone(),
                    WindowLimit {
                        capacity: limit.window_capacity,
                        window: Duration::from_millis(limit.window_ms),
                    },
                )
            },
        )
    }
}

impl From<&CircuitBreakerSection> for CircuitBreakerConfig {
    fn from(section: &CircuitBreakerSection) -> Self {
        CircuitBreakerConfig {
            failure_threshold: section.failure_threshold,
            reset_timeout: Duration::from_secs(section.reset_timeout_secs),
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        RetryPolicy {
            max_attempts: section.max_attempts,
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            max_jitter: Duration::from_millis(section.max_jitter_ms),
            default_retry_after: Duration::from_secs(section.default_retry_after_secs),
        }
    }
}

impl From<&Config> for AggregatorConfig {
    fn from(config: &Config) -> Self {
        AggregatorConfig {
            composite_ttl: Duration::from_secs(config.cache.composite_ttl_secs),
            partial_ttl: Duration::from_secs(config.cache.partial_ttl_secs),
            resource_ttl: Duration::from_secs(config.cache.resource_ttl_secs),
            sub_fetch_timeout: Duration::from_millis(config.aggregator.sub_fetch_timeout_ms),
        }
    }
}
