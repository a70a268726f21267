use crate::environment::Environment;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading or resolving configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown environment '{0}' (expected 'beta' or 'production')")]
    UnknownEnvironment(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::LoadError(e.to_string())
    }
}

/// Main configuration for the labeler service
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// AWS client configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Result tables, one per environment
    #[serde(default)]
    pub tables: TableConfig,
    /// Label detection configuration
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Per-stage timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port, no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// AWS client configuration shared by S3, Rekognition and DynamoDB
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack and friends)
    pub endpoint_url: Option<String>,
    /// Force path-style S3 access
    #[serde(default)]
    pub force_path_style: bool,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket images are uploaded to
    pub bucket: Option<String>,
    /// Key prefix for uploaded images; empty means bare filenames
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Result table names per environment
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TableConfig {
    pub beta: Option<String>,
    pub production: Option<String>,
}

/// Where the detection service reads the image from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    /// Reference the uploaded object by bucket and key
    #[default]
    S3Object,
    /// Send the image bytes inline with the request
    InlineBytes,
}

/// Label detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Maximum number of labels requested per image
    #[serde(default = "default_max_labels")]
    pub max_labels: i32,
    /// Minimum confidence (0-100) for returned labels
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Image source mode
    #[serde(default)]
    pub source: DetectionSource,
    /// Write a record even when no labels were detected
    #[serde(default = "default_true")]
    pub persist_empty: bool,
}

/// Timeouts for each network stage, in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_secs: u64,
    #[serde(default = "default_detect_timeout_secs")]
    pub detect_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_secs: u64,
}

/// Bucket and table a run writes to, resolved from an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub environment: Environment,
    pub bucket: String,
    pub table: String,
}

// Default value functions
fn default_service_name() -> String {
    "labeler".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "rekognition-input".to_string()
}

fn default_max_labels() -> i32 {
    10
}

fn default_min_confidence() -> f32 {
    70.0
}

fn default_true() -> bool {
    true
}

fn default_upload_timeout_secs() -> u64 {
    30
}

fn default_detect_timeout_secs() -> u64 {
    30
}

fn default_write_timeout_secs() -> u64 {
    10
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_labels: default_max_labels(),
            min_confidence: default_min_confidence(),
            source: DetectionSource::default(),
            persist_empty: true,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upload_secs: default_upload_timeout_secs(),
            detect_secs: default_detect_timeout_secs(),
            write_secs: default_write_timeout_secs(),
        }
    }
}

/// Variables read by the earlier tooling, mapped onto config keys.
/// They act as defaults: files and LABELER__* variables override them.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("AWS_REGION", "aws.region"),
    ("S3_BUCKET", "storage.bucket"),
    ("DYNAMODB_TABLE_BETA", "tables.beta"),
    ("DYNAMODB_TABLE_PROD", "tables.production"),
];

impl Config {
    /// Load configuration from defaults, config files and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. built-in defaults and legacy variables (`S3_BUCKET`, ...)
    /// 2. `config/labeler`, `/etc/labeler/labeler`, then `extra_file` if given
    /// 3. `LABELER__*` variables (`LABELER__TABLES__BETA` -> tables.beta)
    pub fn load(extra_file: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .set_default("service.name", "labeler")?
            .set_default("service.log_level", "info")?;

        let mut builder = apply_legacy_env(builder, |name| std::env::var(name).ok())?
            .add_source(config::File::with_name("config/labeler").required(false))
            .add_source(config::File::with_name("/etc/labeler/labeler").required(false));

        if let Some(path) = extra_file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("LABELER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate value ranges. Presence of bucket/table is checked by
    /// [`Config::resolve`] since it depends on the environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.max_labels < 1 {
            return Err(ConfigError::InvalidValue {
                key: "detection.max_labels".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !(0.0..=100.0).contains(&self.detection.min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "detection.min_confidence".to_string(),
                message: "must be between 0 and 100".to_string(),
            });
        }

        for (key, secs) in [
            ("timeouts.upload_secs", self.timeouts.upload_secs),
            ("timeouts.detect_secs", self.timeouts.detect_secs),
            ("timeouts.write_secs", self.timeouts.write_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Resolve the bucket and table for an environment.
    ///
    /// Runs before any network call; a missing value aborts the whole run.
    pub fn resolve(&self, environment: Environment) -> Result<ResolvedTarget, ConfigError> {
        let bucket = required(self.storage.bucket.as_deref(), "storage.bucket")?;
        let table = self.table_for(environment)?;

        Ok(ResolvedTarget {
            environment,
            bucket,
            table,
        })
    }

    /// Table name for an environment (the listing utility needs no bucket)
    pub fn table_for(&self, environment: Environment) -> Result<String, ConfigError> {
        match environment {
            Environment::Beta => required(self.tables.beta.as_deref(), "tables.beta"),
            Environment::Production => {
                required(self.tables.production.as_deref(), "tables.production")
            }
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.upload_secs)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.detect_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.write_secs)
    }
}

fn required(value: Option<&str>, key: &str) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::MissingRequired(key.to_string())),
    }
}

fn apply_legacy_env<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (name, key) in LEGACY_ENV_KEYS {
        if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
            builder = builder.set_default(*key, value)?;
        }
    }
    Ok(builder)
}
