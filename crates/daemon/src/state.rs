//! On-disk application state: the service directory and its config file.

use std::path::PathBuf;

use crate::service_config::{Config, ConfigError};

pub const APP_NAME: &str = "syndicate-ms";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "metadata.db";
pub const LOG_DIR_NAME: &str = "logs";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("service directory not initialized at {0}, run `syndicate-ms init`")]
    NotInitialized(PathBuf),
    #[error("service directory already initialized at {0}")]
    AlreadyInitialized(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub service_dir: PathBuf,
    pub config_path: PathBuf,
    pub config: Config,
}

impl AppState {
    /// `custom` or `~/.syndicate-ms`.
    pub fn service_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        match custom {
            Some(dir) => Ok(dir),
            None => dirs::home_dir()
                .map(|home| home.join(format!(".{}", APP_NAME)))
                .ok_or(StateError::NoHomeDir),
        }
    }

    /// Create the service directory and write `config` (or a default one
    /// pointing the SQLite store and logs inside the directory).
    pub fn init(custom: Option<PathBuf>, config: Option<Config>) -> Result<Self, StateError> {
        let service_dir = Self::service_dir(custom)?;
        let config_path = service_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized(service_dir));
        }
        std::fs::create_dir_all(&service_dir)?;

        let config = config.unwrap_or_else(|| Config {
            sqlite_path: Some(service_dir.join(DB_FILE_NAME)),
            log_dir: Some(service_dir.join(LOG_DIR_NAME)),
            ..Config::default()
        });
        config.save(&config_path)?;
        tracing::info!("initialized {} at {:?}", APP_NAME, service_dir);

        Ok(Self {
            service_dir,
            config_path,
            config,
        })
    }

    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let service_dir = Self::service_dir(custom)?;
        let config_path = service_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(service_dir));
        }
        let config = Config::load(&config_path)?;
        Ok(Self {
            service_dir,
            config_path,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ms");

        let state = AppState::init(Some(root.clone()), None).unwrap();
        assert_eq!(state.config.sqlite_path, Some(root.join(DB_FILE_NAME)));

        let loaded = AppState::load(Some(root.clone())).unwrap();
        assert_eq!(loaded.config, state.config);

        assert!(matches!(
            AppState::init(Some(root), None),
            Err(StateError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("missing"))),
            Err(StateError::NotInitialized(_))
        ));
    }
}
