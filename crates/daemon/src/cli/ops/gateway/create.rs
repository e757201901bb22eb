use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::caps::Capabilities;
use common::crypto::PublicKey;
use common::gateway::{GatewayId, GatewayType};
use syndicate_ms::admin::{self, NewGateway};

use crate::cli::ops::{acting_user, AdminOpError};

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Volume the gateway serves
    #[arg(long)]
    pub volume: String,

    /// Unique gateway name
    #[arg(long)]
    pub name: String,

    /// UG, RG or AG
    #[arg(long = "type", value_parser = parse_gateway_type)]
    pub gateway_type: GatewayType,

    /// User who will own the gateway
    #[arg(long)]
    pub owner: String,

    /// Hex-encoded ed25519 public key of the gateway
    #[arg(long)]
    pub public_key: String,

    /// Comma separated capabilities, e.g. read_metadata,write_metadata
    #[arg(long, default_value = "read_data,read_metadata")]
    pub caps: String,
}

pub(crate) fn parse_gateway_type(raw: &str) -> Result<GatewayType, String> {
    raw.to_ascii_uppercase()
        .parse()
        .map_err(|e: common::gateway::UnknownGatewayType| e.to_string())
}

#[derive(Debug)]
pub struct CreateOutput {
    pub name: String,
    pub gateway_id: GatewayId,
    pub gateway_type: GatewayType,
    pub caps: Capabilities,
}

impl fmt::Display for CreateOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} gateway {}",
            "Created".green().bold(),
            self.gateway_type,
            self.name.bold()
        )?;
        writeln!(f, "  {} {}", "id:".dimmed(), self.gateway_id)?;
        write!(f, "  {} {:?}", "caps:".dimmed(), self.caps)
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Create {
    type Error = AdminOpError;
    type Output = CreateOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let public_key = PublicKey::from_hex(&self.public_key)?;
        let caps = Capabilities::parse_list(&self.caps)?;
        let state = ctx.service_state().await?;
        let owner = acting_user(&state, &self.owner).await?;
        let volume = state
            .catalog()
            .volume_by_name(&self.volume)
            .await?
            .ok_or_else(|| AdminOpError::UnknownVolume(self.volume.clone()))?;

        let gateway = admin::create_gateway(
            &state,
            &owner,
            NewGateway {
                volume_id: volume.volume_id,
                owner_id: owner.owner_id,
                name: self.name.clone(),
                gateway_type: self.gateway_type,
                public_key,
                caps,
                sealed_private_key: None,
            },
        )
        .await?;
        Ok(CreateOutput {
            name: gateway.cert.name.clone(),
            gateway_id: gateway.id(),
            gateway_type: gateway.gateway_type(),
            caps: gateway.caps(),
        })
    }
}
