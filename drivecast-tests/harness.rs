//! Shared test stack: simulated drive + proxy server on loopback ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use drivecast_core::{DrivecastConfig, MediaProxy, RelayMetrics, RuntimeMode};
use drivecast_sim::{SimulatedDrive, SimulatedDriveServer, SimulatedFile};
use drivecast_web::{AppState, build_router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Token accepted by the test drive.
pub const TOKEN: &str = "test-token";

/// Installs a test log subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// File of `size` deterministic bytes.
pub fn media_file(id: &str, name: &str, mime_type: &str, size: usize) -> SimulatedFile {
    SimulatedFile::generate(id, name, mime_type, size, size as u64 ^ 0x5eed)
}

/// Simulated drive and proxy running on free loopback ports.
pub struct TestStack {
    pub drive: Arc<SimulatedDrive>,
    pub sim: SimulatedDriveServer,
    pub metrics: Arc<RelayMetrics>,
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestStack {
    /// Starts a stack with the testing configuration.
    pub async fn start(files: Vec<SimulatedFile>) -> Self {
        Self::with_config(files, DrivecastConfig::for_testing()).await
    }

    /// Starts a stack; the upstream base URL is replaced with the sim's.
    pub async fn with_config(files: Vec<SimulatedFile>, mut config: DrivecastConfig) -> Self {
        init_tracing();

        let drive = Arc::new(SimulatedDrive::with_files(TOKEN, files));
        let sim = SimulatedDriveServer::start_local(Arc::clone(&drive))
            .await
            .unwrap();
        config.upstream.api_base_url = sim.base_url();

        let proxy = MediaProxy::from_config(&config).unwrap();
        let metrics = proxy.metrics();
        let app = build_router(AppState::new(proxy, RuntimeMode::Development));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            drive,
            sim,
            metrics,
            addr,
            task,
        }
    }

    /// Absolute URL on the proxy.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stream URL for `file_id` with the test token in the query.
    pub fn stream_url(&self, file_id: &str) -> String {
        self.url(&format!("/stream/{file_id}?token={TOKEN}"))
    }

    /// Contents of a file in the drive.
    pub fn file_bytes(&self, file_id: &str) -> bytes::Bytes {
        self.drive.file(file_id).unwrap().data
    }

    /// Waits until the relay has recorded `count` finished sessions.
    pub async fn wait_for_finished_sessions(&self, count: u64) {
        for _ in 0..100 {
            let snapshot = self.metrics.snapshot();
            if snapshot.sessions_completed + snapshot.sessions_aborted >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestStack {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// HTTP client that never goes through an environment proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Reads a body chunk by chunk, returning what arrived and whether the
/// transfer failed before the end.
pub async fn read_body(mut response: reqwest::Response) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => return (body, false),
            Err(_) => return (body, true),
        }
    }
}
