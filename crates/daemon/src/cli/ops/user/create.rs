use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::crypto::PublicKey;
use common::user::OwnerId;
use syndicate_ms::admin;

use crate::cli::ops::AdminOpError;

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Unique user name
    #[arg(long)]
    pub name: String,

    /// Hex-encoded ed25519 public key the user signs registrations with
    #[arg(long)]
    pub public_key: String,

    /// Grant administrative rights over every volume
    #[arg(long)]
    pub admin: bool,
}

#[derive(Debug)]
pub struct CreateOutput {
    pub username: String,
    pub owner_id: OwnerId,
    pub is_admin: bool,
}

impl fmt::Display for CreateOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} user {}", "Created".green().bold(), self.username.bold())?;
        writeln!(f, "  {} {}", "id:".dimmed(), self.owner_id)?;
        write!(f, "  {} {}", "admin:".dimmed(), self.is_admin)
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Create {
    type Error = AdminOpError;
    type Output = CreateOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let public_key = PublicKey::from_hex(&self.public_key)?;
        let state = ctx.service_state().await?;
        let user = admin::create_user(&state, &self.name, public_key, self.admin).await?;
        Ok(CreateOutput {
            username: user.username,
            owner_id: user.owner_id,
            is_admin: user.is_admin,
        })
    }
}
