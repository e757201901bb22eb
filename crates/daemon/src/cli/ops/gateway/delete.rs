use clap::Args;

use syndicate_ms::admin;

use crate::cli::ops::{acting_user, AdminOpError};

#[derive(Args, Debug, Clone)]
pub struct Delete {
    /// Gateway to remove
    #[arg(long)]
    pub name: String,

    /// User performing the change (volume owner or an admin)
    #[arg(long = "as")]
    pub actor: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Delete {
    type Error = AdminOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.service_state().await?;
        let actor = acting_user(&state, &self.actor).await?;
        let gateway = state
            .catalog()
            .gateway_by_name(&self.name)
            .await?
            .ok_or_else(|| AdminOpError::UnknownGateway(self.name.clone()))?;

        admin::delete_gateway(&state, &actor, gateway.id()).await?;
        Ok(format!("Deleted gateway {}", self.name))
    }
}
