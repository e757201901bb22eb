use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use metadata_store::CacheConfig;

pub const DEFAULT_NUM_SHARDS: u32 = 20;

/// Runtime configuration of the metadata service, stored as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// SQLite database file. `None` keeps everything in memory.
    pub sqlite_path: Option<PathBuf>,
    pub cache_max_entries: u64,
    pub cache_ttl_secs: u64,
    /// Shard count for aggregates that have no explicit shard config.
    pub default_num_shards: u32,
    pub session_lifetime_secs: u64,
    /// Upper bound on any single fan-out of store/cache reads.
    pub fetch_timeout_ms: u64,
    pub log_level: String,
    /// Directory for the rolling log file. `None` logs to stdout only.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            sqlite_path: None,
            cache_max_entries: 100_000,
            cache_ttl_secs: 60,
            default_num_shards: DEFAULT_NUM_SHARDS,
            session_lifetime_secs: 86_400,
            fetch_timeout_ms: 5_000,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_secs)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache_max_entries,
            ttl_secs: self.cache_ttl_secs,
        }
    }
}
