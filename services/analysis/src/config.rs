use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the analysis service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Classifier invocation configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Retention configuration
    #[serde(default)]
    pub retention: RetentionConfig,
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
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Storage engine behind the analysis store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    /// PostgreSQL, blobs in the record row
    Postgres,
    /// In-memory store for development and tests
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Which storage engine backs the store
    #[serde(default = "default_engine")]
    pub engine: StorageEngine,
    /// PostgreSQL connection URL (required for the postgres engine)
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// External classifier invocation
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Interpreter or binary to run
    #[serde(default = "default_classifier_program")]
    pub program: String,
    /// Inference script passed as the first argument
    #[serde(default = "default_classifier_script")]
    pub script: String,
    /// Kill the classifier after this many seconds
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Directory where uploads are staged for classification
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    /// Upper bound the history endpoint enforces on `limit`
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    /// Reject uploads larger than this many bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Keep only this many most-recent records
    #[serde(default = "default_keep_count")]
    pub keep_count: i64,
    /// How often the pruning task runs, in seconds
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
    /// Disable pruning entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_service_name() -> String {
    "analysis-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_engine() -> StorageEngine {
    StorageEngine::Postgres
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_classifier_program() -> String {
    "python".to_string()
}

fn default_classifier_script() -> String {
    "model/model_inference.py".to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    60
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5001
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_max_page_size() -> i64 {
    500
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

fn default_keep_count() -> i64 {
    1000
}

fn default_retention_interval_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "analysis-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/analysis").required(false))
            .add_source(config::File::with_name("/etc/detector/analysis").required(false))
            // Override with environment variables
            // ANALYSIS__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("ANALYSIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get classifier timeout as Duration
    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.timeout_secs)
    }

    /// Get retention interval as Duration
    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention.interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            program: default_classifier_program(),
            script: default_classifier_script(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            uploads_dir: default_uploads_dir(),
            max_page_size: default_max_page_size(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_count: default_keep_count(),
            interval_secs: default_retention_interval_secs(),
            enabled: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_keep_count(), 1000);
        assert_eq!(default_max_page_size(), 500);
        assert_eq!(default_engine(), StorageEngine::Postgres);
    }

    #[test]
    fn test_engine_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            engine: StorageEngine,
        }
        let w: Wrapper = serde_json::from_str(r#"{"engine": "memory"}"#).unwrap();
        assert_eq!(w.engine, StorageEngine::Memory);
    }

    #[test]
    fn test_defaults_are_complete_without_any_source() {
        let config = Config::default();
        assert_eq!(config.service.name, "analysis-service");
        assert_eq!(config.retention.keep_count, 1000);
        assert!(config.database.url.is_none());
        assert_eq!(config.classifier.program, "python");
    }
}
