use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::volume::VolumeId;
use syndicate_ms::admin::{self, NewVolume};

use crate::cli::ops::{acting_user, AdminOpError};

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Unique volume name
    #[arg(long)]
    pub name: String,

    /// User who will own the volume
    #[arg(long)]
    pub owner: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Serve requests that carry no gateway credentials
    #[arg(long)]
    pub allow_anon: bool,

    /// Shard count for the root directory aggregates
    #[arg(long)]
    pub shards: Option<u32>,
}

#[derive(Debug)]
pub struct CreateOutput {
    pub name: String,
    pub volume_id: VolumeId,
    pub public_key: String,
}

impl fmt::Display for CreateOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} volume {}", "Created".green().bold(), self.name.bold())?;
        writeln!(f, "  {} {}", "id:".dimmed(), self.volume_id)?;
        write!(f, "  {} {}", "public key:".dimmed(), self.public_key)
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Create {
    type Error = AdminOpError;
    type Output = CreateOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.service_state().await?;
        let owner = acting_user(&state, &self.owner).await?;
        let volume = admin::create_volume(
            &state,
            &owner,
            NewVolume {
                name: self.name.clone(),
                description: self.description.clone(),
                allow_anon: self.allow_anon,
                num_shards: self.shards,
            },
        )
        .await?;
        Ok(CreateOutput {
            name: volume.name.clone(),
            volume_id: volume.volume_id,
            public_key: volume.public_key().to_hex(),
        })
    }
}
