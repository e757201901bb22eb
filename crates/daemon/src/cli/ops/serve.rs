use clap::Args;

use syndicate_ms::http_server::{self, HttpServerError};
use syndicate_ms::service_state::StateSetupError;
use syndicate_ms::{logging, ServiceState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Override the configured listen address
    #[arg(long)]
    pub listen: Option<std::net::SocketAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),
    #[error("setup failed: {0}")]
    Setup(#[from] StateSetupError),
    #[error(transparent)]
    Server(#[from] HttpServerError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let app = ctx.app_state()?;
        if let Some(dir) = app.config.log_dir.as_deref() {
            std::fs::create_dir_all(dir).map_err(StateError::Io)?;
        }
        let _guard = logging::init(&app.config);
        tracing::info!(build = %syndicate_ms::build_info(), config = ?app.config_path, "starting");

        let state = ServiceState::from_config(&app.config).await?;
        let listen_addr = self.listen.unwrap_or(app.config.listen_addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(());
            }
        });

        http_server::run(listen_addr, state, shutdown_rx).await?;
        Ok("service stopped".to_string())
    }
}
