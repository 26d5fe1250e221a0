pub use clap::Parser;

use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(about = "Self-custodial key vault, encrypted document sharing and on-chain stamps")]
pub struct Args {
    /// Chain service base URL (overrides the config file)
    #[arg(long, global = true, env = "VELLUM_CHAIN_URL")]
    pub chain_url: Option<Url>,

    /// Path to the vellum state directory (defaults to ~/.vellum)
    #[arg(long, global = true, env = "VELLUM_HOME")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
