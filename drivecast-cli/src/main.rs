//! Drivecast CLI - Command-line interface
//!
//! Starts the streaming proxy and inspects drive files.

mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drivecast")]
#[command(about = "Range-aware streaming proxy for cloud drive media")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    commands::handle_command(cli.command).await?;

    Ok(())
}
