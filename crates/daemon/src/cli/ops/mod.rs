pub mod gateway;
pub mod init;
pub mod serve;
pub mod user;
pub mod version;
pub mod volume;

pub use gateway::Gateway;
pub use init::Init;
pub use serve::Serve;
pub use user::User;
pub use version::Version;
pub use volume::Volume;

use syndicate_ms::ServiceState;

use super::op::ContextError;

/// Resolve the user an administrative op acts as.
pub(crate) async fn acting_user(
    state: &ServiceState,
    username: &str,
) -> Result<common::user::User, AdminOpError> {
    state
        .catalog()
        .user_by_name(username)
        .await?
        .ok_or_else(|| AdminOpError::UnknownUser(username.to_string()))
}

/// Failure of an offline administrative op.
#[derive(Debug, thiserror::Error)]
pub enum AdminOpError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Service(#[from] syndicate_ms::Error),
    #[error("no such user: {0}")]
    UnknownUser(String),
    #[error("no such volume: {0}")]
    UnknownVolume(String),
    #[error("no such gateway: {0}")]
    UnknownGateway(String),
    #[error("invalid public key: {0}")]
    PublicKey(#[from] common::crypto::CryptoError),
    #[error("invalid capabilities: {0}")]
    Capabilities(#[from] common::caps::UnknownCapability),
}
