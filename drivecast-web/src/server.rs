//! Router assembly and server bootstrap.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::http::{Method, header};
use axum::routing::get;
use drivecast_core::{DrivecastConfig, MediaProxy, RuntimeMode};
use drivecast_sim::{DEV_SEED, DEV_TOKEN, SimulatedDrive, SimulatedDriveServer, demo_library};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::handlers::{api_health, api_stats, stream_file};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<MediaProxy>,
    pub mode: RuntimeMode,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(proxy: MediaProxy, mode: RuntimeMode) -> Self {
        Self {
            proxy: Arc::new(proxy),
            mode,
            started_at: Instant::now(),
        }
    }
}

/// CORS policy for browser players.
///
/// Players read `Content-Range` and friends from script, so those must be
/// exposed explicitly.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE, header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([
            header::CONTENT_RANGE,
            header::CONTENT_LENGTH,
            header::ACCEPT_RANGES,
        ])
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Streaming endpoints
        .route("/stream/{id}", get(stream_file))
        .route("/api/stream/{id}", get(stream_file))
        // JSON API endpoints
        .route("/api/health", get(api_health))
        .route("/api/stats", get(api_stats))
        .layer(cors_layer())
        .with_state(state)
}

/// Runs the proxy until the listener fails.
///
/// In development mode a simulated drive holding a demo library is started
/// on a free loopback port and the resolver is pointed at it.
///
/// # Errors
///
/// - Simulated drive or proxy listener cannot bind
/// - HTTP client cannot be built from the configuration
pub async fn run_server(
    mut config: DrivecastConfig,
    mode: RuntimeMode,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Held for the lifetime of the server; dropping it stops the simulated drive.
    let _simulated_drive = match mode {
        RuntimeMode::Production => None,
        RuntimeMode::Development => {
            let drive = Arc::new(SimulatedDrive::with_files(DEV_TOKEN, demo_library(DEV_SEED)));
            let server = SimulatedDriveServer::start_local(drive).await?;
            config.upstream.api_base_url = server.base_url();
            Some(server)
        }
    };

    let proxy = MediaProxy::from_config(&config)?;
    let app = build_router(AppState::new(proxy, mode));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    info!("Drivecast proxy running on http://{} ({} mode)", local, mode);
    if mode.is_development() {
        for file in demo_library(DEV_SEED) {
            info!(
                "  {}: http://{}/stream/{}?token={}",
                file.name, local, file.id, DEV_TOKEN
            );
        }
    }

    axum::serve(listener, app).await?;
    Ok(())
}
