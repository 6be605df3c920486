//! Configuration parsing from YAML/JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::duration;
use super::schema::validate_config_schema;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Longest duration any config key accepts: 100 years of 365.25 days,
/// the year humantime parses.
pub const MAX_DURATION: Duration = Duration::from_secs(3_155_760_000);

fn check_duration(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value > MAX_DURATION {
        return Err(ConfigError::ValidationError(format!(
            "{} must be at most {}",
            key,
            humantime::format_duration(MAX_DURATION)
        )));
    }
    Ok(())
}

/// Settings for one expiring eviction cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of durable entries
    pub max_size: usize,

    /// TTL applied when a put does not specify one; the sweep removes
    /// durable entries older than twice this value
    #[serde(with = "duration::required")]
    pub default_ttl: Duration,

    /// Period of the background sweep
    #[serde(with = "duration::required")]
    pub cleanup_interval: Duration,

    /// Soft bound on ephemeral entries before silent reclamation
    pub ephemeral_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            default_ttl: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            ephemeral_capacity: 1_000,
        }
    }
}

impl CacheConfig {
    /// Few large payloads kept longer.
    pub fn video() -> Self {
        Self {
            max_size: 50,
            default_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Many small payloads.
    pub fn image() -> Self {
        Self {
            max_size: 200,
            default_ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Age beyond which the sweep reclaims a durable entry.
    pub fn stale_after(&self) -> Duration {
        self.default_ttl.saturating_mul(2)
    }

    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_size must be at least 1".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }

        check_duration("default_ttl", self.default_ttl)?;
        check_duration("cleanup_interval", self.cleanup_interval)?;
        Ok(())
    }
}

/// Settings for one circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Failures while closed before opening
    pub failure_threshold: u32,

    /// Successes while half-open before closing
    pub success_threshold: u32,

    /// Time an open breaker waits before allowing a trial call
    #[serde(with = "duration::required")]
    pub timeout: Duration,

    /// Grace period after which a still-open breaker force-resets
    #[serde(with = "duration::required")]
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Breaker guarding API-like actions.
    pub fn api() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "success_threshold must be at least 1".to_string(),
            ));
        }

        check_duration("timeout", self.timeout)?;
        check_duration("reset_timeout", self.reset_timeout)?;
        Ok(())
    }
}

/// The application's standard set of caches and breakers.
///
/// Each section starts from its preset ([`CacheConfig::video`],
/// [`CacheConfig::image`], [`BreakerConfig::api`]); keys present in the
/// document override the preset field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResilienceConfig {
    /// Cache for video payloads
    pub video_cache: CacheConfig,

    /// Cache for image payloads
    pub image_cache: CacheConfig,

    /// Breaker guarding network-like actions
    pub api_breaker: BreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            video_cache: CacheConfig::video(),
            image_cache: CacheConfig::image(),
            api_breaker: BreakerConfig::api(),
        }
    }
}

impl ResilienceConfig {
    /// Parse a config from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Self::from_value(JsonValue::Null);
        }
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a config from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a config file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    /// Build a config from an already-parsed document.
    pub fn from_value(value: JsonValue) -> Result<Self, ConfigError> {
        // An empty YAML document parses as null
        let value = if value.is_null() {
            JsonValue::Object(Default::default())
        } else {
            value
        };

        validate_config_schema(&value)?;

        let config = Self {
            video_cache: resolve_section(value.get("video_cache"), CacheConfig::video())?,
            image_cache: resolve_section(value.get("image_cache"), CacheConfig::image())?,
            api_breaker: resolve_section(value.get("api_breaker"), BreakerConfig::api())?,
        };
        config.validate()?;

        tracing::debug!(
            video_max = config.video_cache.max_size,
            image_max = config.image_cache.max_size,
            failure_threshold = config.api_breaker.failure_threshold,
            "Resilience config loaded"
        );

        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.video_cache
            .validate()
            .map_err(|e| prefix_error("video_cache", e))?;
        self.image_cache
            .validate()
            .map_err(|e| prefix_error("image_cache", e))?;
        self.api_breaker
            .validate()
            .map_err(|e| prefix_error("api_breaker", e))?;
        Ok(())
    }
}

/// Overlay the keys of `section` on the serialized preset.
fn resolve_section<T>(section: Option<&JsonValue>, preset: T) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(preset)?;
    if let (Some(JsonValue::Object(overrides)), JsonValue::Object(base)) = (section, &mut merged) {
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
    }
    Ok(serde_json::from_value(merged)?)
}

fn prefix_error(section: &str, error: ConfigError) -> ConfigError {
    match error {
        ConfigError::ValidationError(msg) => {
            ConfigError::ValidationError(format!("{}.{}", section, msg))
        }
        other => other,
    }
}
