use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the identify service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// S3 configuration for uploaded images
    pub s3: S3Config,
    /// Database configuration for identification records
    pub database: DatabaseConfig,
    /// Vision classifier configuration
    pub classifier: ClassifierConfig,
    /// Bearer token verification configuration
    pub auth: AuthConfig,
    /// Local spool for decoded uploads
    #[serde(default)]
    pub uploads: UploadConfig,
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

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for image storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
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
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Vision classifier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// API key for the generative language API
    pub api_key: String,
    /// Base URL of the generative language API
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,
    /// Model used for identification
    #[serde(default = "default_model")]
    pub model: String,
    /// System instruction sent with every request
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_classifier_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Token verification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Web API key of the identity project
    pub api_key: String,
    /// Base URL of the identity toolkit API
    #[serde(default = "default_auth_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_auth_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Upload spool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory for decoded images awaiting classification
    #[serde(default = "default_upload_dir")]
    pub temp_dir: PathBuf,
}

/// HTTP API configuration
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
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body size
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "identify-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
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

fn default_true() -> bool {
    true
}

fn default_classifier_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "gemini-2.0-pro-exp-02-05".to_string()
}

fn default_system_instruction() -> String {
    "Identify a single plant in the image.\n\
     Output fields in this order: privateThinkingTrace, scientificName, commonNames, confidenceProb, userExplanation."
        .to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    120
}

fn default_auth_base_url() -> String {
    "https://identitytoolkit.googleapis.com".to_string()
}

fn default_auth_timeout_secs() -> u64 {
    10
}

fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join("identify-uploads")
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024 // 20MB of base64
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "identify-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(
                config::File::with_name("config/identify")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/plant-id/identify")
                    .required(false)
            )
            // Override with environment variables
            // IDENTIFY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("IDENTIFY")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl ClassifierConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AuthConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
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

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_upload_dir(),
        }
    }
}
