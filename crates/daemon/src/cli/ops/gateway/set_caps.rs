use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::caps::Capabilities;
use syndicate_ms::admin;

use crate::cli::ops::{acting_user, AdminOpError};

#[derive(Args, Debug, Clone)]
pub struct SetCaps {
    /// Gateway to change
    #[arg(long)]
    pub name: String,

    /// User performing the change (volume owner or an admin)
    #[arg(long = "as")]
    pub actor: String,

    /// Comma separated capabilities replacing the current set
    #[arg(long)]
    pub caps: String,
}

#[derive(Debug)]
pub struct SetCapsOutput {
    pub name: String,
    pub caps: Capabilities,
    pub cert_version: u64,
}

impl fmt::Display for SetCapsOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} gateway {}", "Updated".green().bold(), self.name.bold())?;
        writeln!(f, "  {} {:?}", "caps:".dimmed(), self.caps)?;
        write!(f, "  {} {}", "cert version:".dimmed(), self.cert_version)
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for SetCaps {
    type Error = AdminOpError;
    type Output = SetCapsOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let caps = Capabilities::parse_list(&self.caps)?;
        let state = ctx.service_state().await?;
        let actor = acting_user(&state, &self.actor).await?;
        let gateway = state
            .catalog()
            .gateway_by_name(&self.name)
            .await?
            .ok_or_else(|| AdminOpError::UnknownGateway(self.name.clone()))?;

        let gateway = admin::set_gateway_caps(&state, &actor, gateway.id(), caps).await?;
        Ok(SetCapsOutput {
            name: gateway.cert.name.clone(),
            caps: gateway.caps(),
            cert_version: gateway.cert.cert_version,
        })
    }
}
