use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use syndicate_ms::state::{AppState, StateError, DB_FILE_NAME, LOG_DIR_NAME};
use syndicate_ms::ServiceConfig;

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Address the HTTP service listens on
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// SQLite database file (default: metadata.db in the service directory)
    #[arg(long)]
    pub sqlite: Option<PathBuf>,

    /// Keep all metadata in memory instead of SQLite
    #[arg(long, conflicts_with = "sqlite")]
    pub in_memory: bool,
}

#[derive(Debug)]
pub struct InitOutput {
    pub service_dir: PathBuf,
    pub config_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub sqlite_path: Option<PathBuf>,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} syndicate-ms at {}",
            "Initialized".green().bold(),
            self.service_dir.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Config:".dimmed(), self.config_path.display())?;
        writeln!(f, "  {} {}", "Listen:".dimmed(), self.listen_addr)?;
        match &self.sqlite_path {
            Some(path) => write!(f, "  {} {}", "Database:".dimmed(), path.display()),
            None => write!(f, "  {} in memory", "Database:".dimmed()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service_dir = AppState::service_dir(ctx.config_path.clone())?;
        let sqlite_path = if self.in_memory {
            None
        } else {
            Some(
                self.sqlite
                    .clone()
                    .unwrap_or_else(|| service_dir.join(DB_FILE_NAME)),
            )
        };
        let config = ServiceConfig {
            listen_addr: self.listen,
            sqlite_path,
            log_dir: Some(service_dir.join(LOG_DIR_NAME)),
            ..ServiceConfig::default()
        };

        let state = AppState::init(Some(service_dir), Some(config))?;
        Ok(InitOutput {
            service_dir: state.service_dir,
            config_path: state.config_path,
            listen_addr: state.config.listen_addr,
            sqlite_path: state.config.sqlite_path,
        })
    }
}
