use clap::Args;

pub mod create;
pub mod delete;
pub mod set_caps;

use crate::cli::op::Op;

crate::command_enum! {
    (Create, create::Create),
    (SetCaps, set_caps::SetCaps),
    (Delete, delete::Delete),
}

pub type GatewayCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Gateway {
    #[command(subcommand)]
    pub command: GatewayCommand,
}

#[async_trait::async_trait]
impl Op for Gateway {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
