use clap::Args;

pub mod create;
pub mod update;

use crate::cli::op::Op;

crate::command_enum! {
    (Create, create::Create),
    (Update, update::Update),
}

pub type VolumeCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Volume {
    #[command(subcommand)]
    pub command: VolumeCommand,
}

#[async_trait::async_trait]
impl Op for Volume {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
