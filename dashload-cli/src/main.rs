//! Dashload CLI - Command-line interface
//!
//! Runs streaming sessions and bandwidth probes on the simulation host.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use dashload_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "dashload")]
#[command(about = "Adaptive streaming and available-bandwidth probing simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level; RUST_LOG overrides it
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run trace file
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    commands::handle_command(cli.command).await
}
