use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use syndicate_ms::admin::{self, VolumeChanges};

use crate::cli::ops::{acting_user, AdminOpError};

#[derive(Args, Debug, Clone)]
pub struct Update {
    /// Volume to change
    #[arg(long)]
    pub name: String,

    /// User performing the change (volume owner or an admin)
    #[arg(long = "as")]
    pub actor: String,

    #[arg(long)]
    pub description: Option<String>,

    /// Allow or refuse requests without gateway credentials
    #[arg(long)]
    pub allow_anon: Option<bool>,
}

#[derive(Debug)]
pub struct UpdateOutput {
    pub name: String,
    pub version: u64,
}

impl fmt::Display for UpdateOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} volume {} (version {})",
            "Updated".green().bold(),
            self.name.bold(),
            self.version
        )
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Update {
    type Error = AdminOpError;
    type Output = UpdateOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.service_state().await?;
        let actor = acting_user(&state, &self.actor).await?;
        let volume = state
            .catalog()
            .volume_by_name(&self.name)
            .await?
            .ok_or_else(|| AdminOpError::UnknownVolume(self.name.clone()))?;

        let volume = admin::update_volume(
            &state,
            &actor,
            volume.volume_id,
            VolumeChanges {
                description: self.description.clone(),
                allow_anon: self.allow_anon,
            },
        )
        .await?;
        Ok(UpdateOutput {
            name: volume.name,
            version: volume.version,
        })
    }
}
