use clap::Args;

pub mod create;

use crate::cli::op::Op;

crate::command_enum! {
    (Create, create::Create),
}

pub type UserCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct User {
    #[command(subcommand)]
    pub command: UserCommand,
}

#[async_trait::async_trait]
impl Op for User {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
