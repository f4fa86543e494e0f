//! Channelshift CLI - Command-line interface
//!
//! Watches a live stream through the timeshift engine and manages buffers.

mod commands;

use channelshift_core::tracing_setup::{CliLogLevel, init_tracing};
use clap::Parser;

#[derive(Parser)]
#[command(name = "channelshift")]
#[command(about = "Pause and resume live streams with a local timeshift buffer")]
struct Cli {
    /// Console log level; the log file always records everything
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None)?;

    commands::handle_command(cli.command).await
}
