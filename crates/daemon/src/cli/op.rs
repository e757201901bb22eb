use std::fmt;
use std::path::PathBuf;

use syndicate_ms::service_state::StateSetupError;
use syndicate_ms::{AppState, ServiceState, StateError};

/// Shared inputs of every CLI operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Service directory override; `None` means `~/.syndicate-ms`.
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to open metadata store: {0}")]
    Setup(#[from] StateSetupError),
}

impl OpContext {
    pub fn app_state(&self) -> Result<AppState, StateError> {
        AppState::load(self.config_path.clone())
    }

    /// Open the configured store for an offline administrative change.
    pub async fn service_state(&self) -> Result<ServiceState, ContextError> {
        let app = self.app_state()?;
        Ok(ServiceState::from_config(&app.config).await?)
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output: fmt::Display + Send;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Generate a clap `Command` enum over `(Variant, OpType)` pairs, together
/// with `OpOutput`/`OpError` enums and an [`Op`] impl that dispatches to
/// the selected variant.
#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $ty:ty)),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($ty),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$ty as $crate::cli::op::Op>::Output),)*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(OpOutput::$variant(output) => write!(f, "{}", output),)*
                }
            }
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$ty as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => op
                            .execute(ctx)
                            .await
                            .map(OpOutput::$variant)
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}
