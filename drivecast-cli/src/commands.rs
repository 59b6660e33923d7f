//! CLI command implementations

use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use drivecast_core::streaming::ChunkingPolicy;
use drivecast_core::upstream::GraphResolver;
use drivecast_core::{Credential, DrivecastConfig, RuntimeMode, UpstreamResolver};
use tracing::{debug, info};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming proxy
    Server {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Serve a simulated drive with demo files instead of the real API
        #[arg(long)]
        dev: bool,
    },
    /// Resolve a file id and show how it would be streamed
    Resolve {
        /// Drive item id
        file_id: String,
        /// Bearer token for the drive API
        #[arg(long, env = "DRIVECAST_TOKEN", hide_env_values = true)]
        token: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of the command that ran
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Server { host, port, dev } => start_server(host, port, dev).await,
        Commands::Resolve { file_id, token } => resolve_file(file_id, token).await,
    }
}

/// Start the proxy server
///
/// # Errors
/// - Listener or simulated drive cannot bind
pub async fn start_server(host: Option<String>, port: Option<u16>, dev: bool) -> Result<()> {
    let mut config = DrivecastConfig::from_env();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let mode = if dev {
        RuntimeMode::Development
    } else {
        RuntimeMode::Production
    };

    info!(host = %config.server.host, port = config.server.port, %mode, "Starting drivecast");
    drivecast_web::run_server(config, mode)
        .await
        .map_err(|e| anyhow!("Server failed: {e}"))
}

/// Resolve one file and print its descriptor and streaming policy
///
/// # Errors
/// - Token blank, or metadata request failed
pub async fn resolve_file(file_id: String, token: String) -> Result<()> {
    let config = DrivecastConfig::from_env();
    let credential = Credential::bearer(token).context("Token must not be blank")?;
    let resolver = GraphResolver::new(&config.upstream)?;
    debug!(api = %config.upstream.api_base_url, "Resolving {file_id}");

    let descriptor = resolver
        .resolve(&file_id, &credential)
        .await
        .with_context(|| format!("Failed to resolve {file_id}"))?;
    let policy = ChunkingPolicy::select(&descriptor, &config.streaming);

    println!("File:          {}", descriptor.declared_name);
    println!("Id:            {}", descriptor.id);
    println!("Size:          {} bytes", descriptor.total_size);
    println!("Declared type: {}", descriptor.declared_content_type);
    println!("Served type:   {}", descriptor.classified_content_type);
    println!("Media kind:    {:?}", descriptor.media_kind);
    println!("Download host: {}", descriptor.upstream_host());
    println!("Size class:    {:?}", policy.size_class);
    println!("Chunk size:    {} bytes", policy.chunk_size);
    println!("Read timeout:  {:?}", policy.upstream_timeout);
    if let Some(window) = policy.max_window_bytes() {
        println!("Max window:    {window} bytes");
    }

    Ok(())
}
