//! K-Hive CLI: orchestrates the content pipeline agents.
//!
//! Runs a whole pipeline mode (`--full`, `--tiktok`, ...) or a single agent
//! (`khive agent <name>`) against a pipeline root directory.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
