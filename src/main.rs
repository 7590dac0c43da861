//! Crossway - unified CLI entrypoint.
//!
//! Usage:
//!   crossway start --config config/crossway.toml
//!   crossway store --config config/primary.toml
//!   crossway query status INT-B2
//!   crossway query green-wave --row B --reason ambulance
//!   crossway check-config --config config/crossway.toml

use anyhow::Result;
use clap::Parser;
use crossway::cli::commands::{run_check_config, run_query, run_start, run_store};
use crossway::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::Store(args) => run_store(args).await,
        Commands::Query(args) => run_query(args).await,
        Commands::CheckConfig(args) => run_check_config(args),
    }
}
