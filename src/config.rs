use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::store::StoreOptions;

/// Main configuration for the service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Storage bridge configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// S3 configuration, required by the `s3` driver
    pub s3: Option<S3Config>,
    /// Database configuration, required by the `s3` driver
    pub database: Option<DatabaseConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Listen address
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

/// Which backends the storage bridge talks to
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    /// S3 objects with Postgres file records
    S3,
    /// In-process objects and records, lost on restart
    #[default]
    Memory,
}

/// Storage bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub driver: StorageDriver,
    /// Chunks buffered between a pipe end and its worker task
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
    /// Largest object a single download may buffer
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: usize,
    /// Largest coverage report accepted by the report endpoint
    #[serde(default = "default_max_report_bytes")]
    pub max_report_bytes: usize,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding every stored file
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Part size for multipart uploads in bytes (raised to 5 MiB when smaller)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
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
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_service_name() -> String {
    "coverhub".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_pipe_capacity() -> usize {
    16
}

fn default_max_download_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_max_report_bytes() -> usize {
    2 * 1024 * 1024 // 2MB
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/coverhub").required(false))
            // COVERHUB__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("COVERHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Options handed to [`FileStore::new`](crate::store::FileStore::new)
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            pipe_capacity: self.storage.pipe_capacity,
            max_download_bytes: self.storage.max_download_bytes,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            address: default_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::default(),
            pipe_capacity: default_pipe_capacity(),
            max_download_bytes: default_max_download_bytes(),
            max_report_bytes: default_max_report_bytes(),
        }
    }
}
