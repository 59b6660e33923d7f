//! End-to-end streaming through the proxy's HTTP server
//!
//! A reqwest client plays the browser, the proxy runs on a loopback port,
//! and the simulated drive stands in for the cloud API.

use drivecast_core::{DrivecastConfig, OutOfRangePolicy};
use drivecast_sim::FaultPlan;
use reqwest::StatusCode;
use reqwest::header;

use crate::harness::{TOKEN, TestStack, client, media_file, read_body};

const SMALL: usize = 10_000;
/// Above the testing large-file threshold (64 KiB).
const LARGE: usize = 200 * 1024;

async fn small_stack() -> TestStack {
    TestStack::start(vec![
        media_file("clip", "clip.mp4", "video/mp4", SMALL),
        media_file("movie", "Feature Film.mkv", "application/octet-stream", SMALL),
        media_file("big", "big.mp4", "video/mp4", LARGE),
    ])
    .await
}

async fn get_range(stack: &TestStack, file_id: &str, range: &str) -> reqwest::Response {
    client()
        .get(stack.stream_url(file_id))
        .header(header::RANGE, range)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_transfer_without_range() {
    let stack = small_stack().await;

    let response = client().get(stack.stream_url("clip")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], SMALL.to_string().as_str());
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());

    let body = response.bytes().await.unwrap();
    assert_eq!(body, stack.file_bytes("clip"));
}

#[tokio::test]
async fn test_valid_ranges_are_byte_exact() {
    let stack = small_stack().await;
    let expected = stack.file_bytes("clip");

    for (start, end) in [(0, 0), (0, 99), (100, 199), (4321, 8765), (9999, 9999)] {
        let response = get_range(&stack, "clip", &format!("bytes={start}-{end}")).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            format!("bytes {start}-{end}/{SMALL}").as_str()
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            (end - start + 1).to_string().as_str()
        );
        let body = response.bytes().await.unwrap();
        assert_eq!(body, expected.slice(start..=end));
    }
}

#[tokio::test]
async fn test_repeated_range_is_identical() {
    let stack = small_stack().await;

    let first = get_range(&stack, "clip", "bytes=500-2499").await.bytes().await.unwrap();
    let second = get_range(&stack, "clip", "bytes=500-2499").await.bytes().await.unwrap();

    assert_eq!(first.len(), 2000);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_out_of_range_start_restarts_at_zero() {
    let stack = small_stack().await;

    let response = get_range(&stack, "clip", "bytes=50000-").await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        format!("bytes 0-{}/{SMALL}", SMALL - 1).as_str()
    );
    assert_eq!(response.bytes().await.unwrap(), stack.file_bytes("clip"));
}

#[tokio::test]
async fn test_head_reports_headers_without_download() {
    let stack = small_stack().await;

    let response = client()
        .head(stack.stream_url("movie"))
        .header(header::RANGE, "bytes=0-99")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        format!("bytes 0-99/{SMALL}").as_str()
    );
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/x-matroska");

    assert_eq!(stack.drive.stats().metadata_requests, 1);
    assert_eq!(stack.drive.stats().download_requests, 0);
    assert_eq!(stack.metrics.snapshot().sessions_started, 0);
}

#[tokio::test]
async fn test_reject_policy_answers_416() {
    let mut config = DrivecastConfig::for_testing();
    config.streaming.out_of_range = OutOfRangePolicy::Reject;
    let stack = TestStack::with_config(
        vec![media_file("clip", "clip.mp4", "video/mp4", SMALL)],
        config,
    )
    .await;

    let response = get_range(&stack, "clip", "bytes=50000-").await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        format!("bytes */{SMALL}").as_str()
    );
    assert_eq!(stack.drive.stats().download_requests, 0);
}

#[tokio::test]
async fn test_unusable_range_headers_fall_back_to_full() {
    let stack = small_stack().await;

    for range in ["bytes=0-99,200-299", "pages=1-2", "bytes=abc-"] {
        let response = get_range(&stack, "clip", range).await;
        assert_eq!(response.status(), StatusCode::OK, "{range}");
        assert_eq!(response.bytes().await.unwrap().len(), SMALL, "{range}");
    }
}

#[tokio::test]
async fn test_large_file_window_is_bounded() {
    let stack = small_stack().await;

    // Testing preset: 4 KiB chunks, 4 chunks per window.
    let response = get_range(&stack, "big", "bytes=1000-").await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        format!("bytes 1000-17383/{LARGE}").as_str()
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body = response.bytes().await.unwrap();
    assert_eq!(body, stack.file_bytes("big").slice(1000..17384));
}

#[tokio::test]
async fn test_matroska_is_classified_and_decorated() {
    let stack = small_stack().await;

    let response = get_range(&stack, "movie", "bytes=0-1023").await;

    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/x-matroska");
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("inline;"));
    assert!(disposition.contains("Feature%20Film.mkv"));
}

#[tokio::test]
async fn test_credential_sources_and_alias() {
    let stack = small_stack().await;

    let response = client()
        .get(stack.url("/api/stream/clip"))
        .bearer_auth(TOKEN)
        .header(header::RANGE, "bytes=0-9")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let response = client()
        .get(stack.url("/stream/clip?quality=1080p"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(stack.drive.stats().metadata_requests, 1);
}

#[tokio::test]
async fn test_pre_stream_error_statuses() {
    let stack = small_stack().await;
    stack.drive.inject_fault("movie", FaultPlan::metadata_status(503));

    let response = client()
        .get(stack.url("/stream/clip?token=wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client().get(stack.stream_url("nope")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client().get(stack.stream_url("movie")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["error"], "Upstream storage error");
}

#[tokio::test]
async fn test_download_refusal_is_bad_gateway() {
    let stack = small_stack().await;
    stack.drive.inject_fault("clip", FaultPlan::download_status(403));

    let response = client().get(stack.stream_url("clip")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.bytes().await.unwrap().is_empty());

    let metrics = stack.metrics.snapshot();
    assert_eq!(metrics.sessions_aborted, 1);
    assert_eq!(stack.drive.stats().download_requests, 1);
}

#[tokio::test]
async fn test_mid_stream_drop_truncates_and_records_once() {
    let stack = small_stack().await;
    stack.drive.inject_fault("big", FaultPlan::drop_after(50_000));

    let response = client().get(stack.stream_url("big")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], LARGE.to_string().as_str());

    let (body, failed) = read_body(response).await;
    assert!(failed);
    assert!(body.len() <= 50_000);
    assert_eq!(body[..], stack.file_bytes("big")[..body.len()]);

    stack.wait_for_finished_sessions(1).await;
    let metrics = stack.metrics.snapshot();
    assert_eq!(metrics.sessions_started, 1);
    assert_eq!(metrics.sessions_aborted, 1);
    assert_eq!(metrics.upstream_failures, 1);
    assert_eq!(metrics.sessions_completed, 0);
    assert_eq!(stack.drive.stats().download_requests, 1);
}

#[tokio::test]
async fn test_stalled_upstream_times_out() {
    let stack = small_stack().await;
    stack.drive.inject_fault("clip", FaultPlan::stall_after(1000));

    let response = client().get(stack.stream_url("clip")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (body, failed) = read_body(response).await;
    assert!(failed);
    assert!(body.len() <= 1000);

    stack.wait_for_finished_sessions(1).await;
    assert_eq!(stack.metrics.snapshot().upstream_failures, 1);
}

#[tokio::test]
async fn test_abandoned_transfer_is_recorded_once() {
    let stack = small_stack().await;
    stack.drive.inject_fault("big", FaultPlan::stall_after(LARGE as u64 / 2));

    let mut response = client().get(stack.stream_url("big")).send().await.unwrap();
    let first = response.chunk().await.unwrap();
    assert!(first.is_some());
    drop(response);

    // Ends as a disconnect or an idle timeout depending on socket buffering.
    stack.wait_for_finished_sessions(1).await;
    let metrics = stack.metrics.snapshot();
    assert_eq!(metrics.sessions_started, 1);
    assert_eq!(metrics.sessions_aborted, 1);
    assert_eq!(metrics.sessions_completed, 0);
    assert_eq!(metrics.client_disconnects + metrics.upstream_failures, 1);
}

#[tokio::test]
async fn test_health_and_stats_endpoints() {
    let stack = small_stack().await;

    let health: serde_json::Value = client()
        .get(stack.url("/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["mode"], "development");

    get_range(&stack, "clip", "bytes=0-99").await.bytes().await.unwrap();
    stack.wait_for_finished_sessions(1).await;

    let stats: serde_json::Value = client()
        .get(stack.url("/api/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["sessions_completed"], 1);
    assert_eq!(stats["bytes_relayed"], 100);
}
