use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;

/// Main configuration for the relay service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Upload limits
    #[serde(default)]
    pub upload: UploadConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
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
    /// Expose Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
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
    /// Shared secret clients must present
    #[serde(default)]
    pub api_key: String,
    /// Header carrying the shared secret
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Ceiling for non-multipart request bodies
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

/// Multipart upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum size of a single file
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
    /// Maximum number of files in one batch request
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Folder used when the request names none
    #[serde(default = "default_folder")]
    pub default_folder: String,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Destination bucket
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, R2, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Prefix for returned object URLs, e.g. a CDN domain
    pub public_base_url: Option<String>,
    /// Upload concurrency limit within one batch
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "relay-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_body_limit() -> usize {
    50 * 1024 * 1024 // 50MB
}

fn default_max_file_size() -> usize {
    15 * 1024 * 1024 // 15MB
}

fn default_max_files() -> usize {
    10
}

fn default_folder() -> String {
    "uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/relay").required(false))
            .add_source(config::File::with_name("/etc/relay/relay").required(false))
            // RELAY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            // Plain PORT / API_KEY as used by existing deployments
            .set_override_option("api.port", env::var("PORT").ok())?
            .set_override_option("api.api_key", env::var("API_KEY").ok())?
            .build()?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid relay configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.api_key.is_empty() {
            bail!("api.api_key must be set (API_KEY or RELAY__API__API_KEY)");
        }
        if self.api.api_key_header.is_empty() {
            bail!("api.api_key_header must not be empty");
        }
        if self.s3.bucket.is_empty() {
            bail!("s3.bucket must be set (RELAY__S3__BUCKET)");
        }
        if self.upload.max_files == 0 {
            bail!("upload.max_files must be at least 1");
        }
        if self.s3.upload_concurrency == 0 {
            bail!("s3.upload_concurrency must be at least 1");
        }
        if self.s3.part_size_bytes < 5 * 1024 * 1024 {
            bail!("s3.part_size_bytes must be at least 5MB");
        }
        Ok(())
    }

    /// Listen address for the HTTP API
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
            api_key_header: default_api_key_header(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            max_files: default_max_files(),
            default_folder: default_folder(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
            upload_concurrency: default_upload_concurrency(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}
