//! Graph resolver against the simulated drive's metadata endpoint.

use std::sync::Arc;

use drivecast_core::streaming::MediaKind;
use drivecast_core::upstream::GraphResolver;
use drivecast_core::{Credential, DrivecastConfig, ResolveError, UpstreamResolver};
use drivecast_sim::{FaultPlan, SimulatedDrive, SimulatedDriveServer};

use crate::harness::{TOKEN, media_file};

async fn resolver_for(drive: Arc<SimulatedDrive>) -> (GraphResolver, SimulatedDriveServer) {
    let server = SimulatedDriveServer::start_local(drive).await.unwrap();
    let mut config = DrivecastConfig::for_testing();
    config.upstream.api_base_url = server.base_url();
    (GraphResolver::new(&config.upstream).unwrap(), server)
}

fn drive() -> Arc<SimulatedDrive> {
    Arc::new(SimulatedDrive::with_files(
        TOKEN,
        [media_file("movie", "Feature.mkv", "application/octet-stream", 4096)],
    ))
}

fn token() -> Credential {
    Credential::bearer(TOKEN).unwrap()
}

#[tokio::test]
async fn test_resolves_descriptor() {
    let (resolver, server) = resolver_for(drive()).await;

    let descriptor = resolver.resolve("movie", &token()).await.unwrap();

    assert_eq!(descriptor.id, "movie");
    assert_eq!(descriptor.total_size, 4096);
    assert_eq!(descriptor.declared_content_type, "application/octet-stream");
    assert_eq!(descriptor.classified_content_type, "video/x-matroska");
    assert_eq!(descriptor.media_kind, MediaKind::Video);
    assert!(
        descriptor
            .upstream_url
            .as_str()
            .starts_with(&format!("{}/download/movie", server.base_url()))
    );
    assert_eq!(server.drive().stats().metadata_requests, 1);
}

#[tokio::test]
async fn test_rejected_token_is_unauthorized() {
    let (resolver, _server) = resolver_for(drive()).await;

    let err = resolver
        .resolve("movie", &Credential::bearer("stolen").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Unauthorized));
}

#[tokio::test]
async fn test_unknown_and_forbidden_items_are_not_found() {
    let drive = drive();
    drive.inject_fault("movie", FaultPlan::metadata_status(403));
    let (resolver, _server) = resolver_for(drive).await;

    let err = resolver.resolve("nothing", &token()).await.unwrap_err();
    assert!(matches!(err, ResolveError::NotFound { .. }));

    let err = resolver.resolve("movie", &token()).await.unwrap_err();
    assert!(matches!(err, ResolveError::NotFound { .. }));
}

#[tokio::test]
async fn test_server_error_is_upstream_error() {
    let drive = drive();
    drive.inject_fault("movie", FaultPlan::metadata_status(503));
    let (resolver, _server) = resolver_for(drive).await;

    let err = resolver.resolve("movie", &token()).await.unwrap_err();
    assert!(matches!(err, ResolveError::Upstream { .. }));
}

#[tokio::test]
async fn test_missing_download_url() {
    let drive = drive();
    drive.inject_fault(
        "movie",
        FaultPlan {
            omit_download_url: true,
            ..Default::default()
        },
    );
    let (resolver, _server) = resolver_for(drive).await;

    let err = resolver.resolve("movie", &token()).await.unwrap_err();
    assert!(matches!(err, ResolveError::MissingDownloadUrl { .. }));
}
