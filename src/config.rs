use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB
const DEFAULT_CONCURRENT_OPS: usize = 5;

/// Top-level application configuration loaded from file + environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub filesystem: FilesystemSection,
    pub remote: RemoteSection,
    pub transfer: TransferSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from disk and environment.
    pub fn load() -> Result<Self> {
        let config_path = env::var("AQUEDUCT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let mut builder = config::Config::builder();

        if Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(&config_path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AQUEDUCT")
                .separator("_")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        let mut config: Self = settings.try_deserialize()?;

        if config.logging.level.trim().is_empty() {
            config.logging.level = "info".to_string();
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL used to build hypermedia links in metadata documents.
    pub domain: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            domain: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilesystemSection {
    /// Storage root the filesystem provider is confined to.
    pub root: String,
}

impl Default for FilesystemSection {
    fn default() -> Self {
        Self {
            root: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RemoteSection {
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Chunk size for streaming reads.
    pub chunk_size: usize,
    /// Batch size for recursive copy/move operations.
    pub concurrent_ops: usize,
    /// Outbound calls allowed per throttle interval.
    pub throttle_concurrency: usize,
    /// Throttle window in milliseconds.
    pub throttle_interval_ms: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrent_ops: DEFAULT_CONCURRENT_OPS,
            throttle_concurrency: 10,
            throttle_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}
