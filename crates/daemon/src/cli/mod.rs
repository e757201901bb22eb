use std::path::PathBuf;

use clap::Parser;

pub mod op;
pub mod ops;

crate::command_enum! {
    (Init, ops::Init),
    (Serve, ops::Serve),
    (User, ops::User),
    (Volume, ops::Volume),
    (Gateway, ops::Gateway),
    (Version, ops::Version),
}

#[derive(Parser, Debug)]
#[command(name = "syndicate-ms", about = "Syndicate metadata service", version)]
pub struct Args {
    /// Service directory (default: ~/.syndicate-ms)
    #[arg(long, global = true, env = "SYNDICATE_MS_DIR")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}
