//! `MediaProxy` driving the real HTTP upstream client against the sim.

use std::sync::Arc;

use drivecast_core::{
    Credential, DrivecastConfig, DrivecastError, MediaProxy, RelayError, ResolveError,
    StreamRequest,
};
use drivecast_sim::{FaultPlan, SimulatedDrive, SimulatedDriveServer, SimulatedFile};

use crate::harness::{TOKEN, init_tracing, media_file};

struct Fixture {
    proxy: MediaProxy,
    server: SimulatedDriveServer,
}

async fn fixture(files: Vec<SimulatedFile>) -> Fixture {
    init_tracing();
    let drive = Arc::new(SimulatedDrive::with_files(TOKEN, files));
    let server = SimulatedDriveServer::start_local(drive).await.unwrap();
    let mut config = DrivecastConfig::for_testing();
    config.upstream.api_base_url = server.base_url();

    Fixture {
        proxy: MediaProxy::from_config(&config).unwrap(),
        server,
    }
}

fn request(file_id: &str) -> StreamRequest {
    StreamRequest::new(file_id).with_credential(Credential::bearer(TOKEN).unwrap())
}

async fn body(response: axum::response::Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_partial_window_matches_upstream_bytes() {
    let fixture = fixture(vec![media_file("clip", "clip.mp4", "video/mp4", 20_000)]).await;
    let expected = fixture.server.drive().file("clip").unwrap().data;

    let response = fixture
        .proxy
        .serve(request("clip").with_range("bytes=1234-5678"))
        .await
        .unwrap();

    assert_eq!(response.status(), 206);
    assert_eq!(body(response).await, expected.slice(1234..=5678));

    let stats = fixture.server.drive().stats();
    assert_eq!(stats.metadata_requests, 1);
    assert_eq!(stats.download_requests, 1);
}

#[tokio::test]
async fn test_upstream_ignoring_range_still_yields_exact_window() {
    let fixture = fixture(vec![media_file("clip", "clip.mp4", "video/mp4", 20_000)]).await;
    let drive = fixture.server.drive();
    drive.inject_fault("clip", FaultPlan::ignore_range());
    let expected = drive.file("clip").unwrap().data;

    let response = fixture
        .proxy
        .serve(request("clip").with_range("bytes=15000-15999"))
        .await
        .unwrap();

    assert_eq!(response.status(), 206);
    assert_eq!(
        response.headers()["content-range"],
        "bytes 15000-15999/20000"
    );
    assert_eq!(body(response).await, expected.slice(15000..16000));
}

#[tokio::test]
async fn test_metadata_failure_never_touches_download_url() {
    let fixture = fixture(vec![media_file("clip", "clip.mp4", "video/mp4", 1000)]).await;
    let drive = fixture.server.drive();
    drive.inject_fault("clip", FaultPlan::metadata_status(500));

    let err = fixture.proxy.serve(request("clip")).await.unwrap_err();

    assert!(matches!(err, DrivecastError::Resolve(ResolveError::Upstream { .. })));
    assert_eq!(drive.stats().download_requests, 0);
}

#[tokio::test]
async fn test_download_refusal_is_a_relay_error() {
    let fixture = fixture(vec![media_file("clip", "clip.mp4", "video/mp4", 1000)]).await;
    fixture
        .server
        .drive()
        .inject_fault("clip", FaultPlan::download_status(403));

    let err = fixture.proxy.serve(request("clip")).await.unwrap_err();

    assert!(matches!(
        err,
        DrivecastError::Relay(RelayError::UpstreamStatus { status: 403 })
    ));
    let metrics = fixture.proxy.metrics().snapshot();
    assert_eq!(metrics.sessions_aborted, 1);
    assert_eq!(metrics.sessions_completed, 0);
}
