mod cli;

use clap::Parser;

use cli::op::{Op, OpContext};
use cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let ctx = OpContext {
        config_path: args.config,
    };

    let output = args.command.execute(&ctx).await?;
    println!("{}", output);
    Ok(())
}
