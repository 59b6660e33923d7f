//! Relay engine: turns a negotiated plan into a streaming HTTP response.
//!
//! Exactly one upstream request is opened per response. The upstream is
//! opened before the response head is built so that a failing download URL
//! can still be answered with an error status; once the head is returned,
//! failures can only end the body early.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::decorators::DecoratorChain;
use super::media_type::OCTET_STREAM;
use super::metrics::RelayMetrics;
use super::policy::ChunkingPolicy;
use super::range::{ByteRange, RangePlan};
use super::session::{AbortReason, SessionOutcome, StreamSession};
use crate::config::millis;
use crate::upstream::{ByteSource, MediaDescriptor, SourceError, UpstreamBody};

/// Failures detected before any body byte is produced.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Download URL answered with a status the plan cannot use.
    #[error("Download URL returned status {status}")]
    UpstreamStatus { status: u16 },

    /// Download URL did not answer within the policy timeout.
    #[error("Download URL did not respond within {timeout_ms} ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// Download request could not be sent.
    #[error("Download request failed: {0}")]
    Open(#[from] SourceError),
}

struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
    window: Option<ByteRange>,
    length: u64,
}

/// Streams upstream bytes for negotiated plans.
///
/// Stateless apart from the shared counters; one engine serves every
/// concurrent request.
pub struct RelayEngine {
    source: Arc<dyn ByteSource>,
    decorators: DecoratorChain,
    metrics: Arc<RelayMetrics>,
}

impl RelayEngine {
    /// Creates an engine with the standard format decorators.
    pub fn new(source: Arc<dyn ByteSource>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            source,
            decorators: DecoratorChain::standard(),
            metrics,
        }
    }

    /// Replaces the decorator chain.
    pub fn with_decorators(mut self, decorators: DecoratorChain) -> Self {
        self.decorators = decorators;
        self
    }

    /// Shared relay counters.
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Builds the response for `plan`, opening the upstream when bytes are owed.
    ///
    /// `Full` yields 200 with the whole object, `Partial` yields 206 with
    /// `Content-Range`, and `Unsatisfiable` yields 416 without touching the
    /// upstream. The body is a [`StreamSession`] identified by `session_id`.
    ///
    /// # Errors
    ///
    /// - `RelayError::UpstreamStatus` - Download URL answered with an unusable status
    /// - `RelayError::UpstreamTimeout` - No response head within the policy timeout
    /// - `RelayError::Open` - Download request could not be sent
    pub async fn stream(
        &self,
        session_id: Uuid,
        descriptor: &MediaDescriptor,
        plan: RangePlan,
        policy: &ChunkingPolicy,
    ) -> Result<Response, RelayError> {
        let head = match self.response_head(descriptor, plan, policy) {
            Ok(head) => head,
            Err(rejected) => return Ok(rejected),
        };

        if head.length == 0 {
            debug!("Serving empty object {}", descriptor.id);
            return Ok(build_response(head.status, head.headers, Body::empty()));
        }

        let upstream = self.open_upstream(descriptor, head.window, policy).await?;

        // An upstream that ignores Range sends the whole object from byte 0.
        let skip = match head.window {
            Some(range) if upstream.status == 200 && range.start > 0 => {
                warn!(
                    "Upstream {} ignored range for {}, skipping {} bytes",
                    descriptor.upstream_host(),
                    descriptor.id,
                    range.start
                );
                range.start
            }
            _ => 0,
        };

        let session = StreamSession::new(
            session_id,
            descriptor.id.clone(),
            upstream.stream,
            skip,
            head.length,
            policy,
            Arc::clone(&self.metrics),
        );

        Ok(build_response(head.status, head.headers, Body::from_stream(session)))
    }

    /// Builds the response a `HEAD` request gets for `plan`.
    ///
    /// Same status and headers as [`stream`](Self::stream), but the upstream
    /// is never opened and no session is counted.
    pub fn head(
        &self,
        descriptor: &MediaDescriptor,
        plan: RangePlan,
        policy: &ChunkingPolicy,
    ) -> Response {
        match self.response_head(descriptor, plan, policy) {
            Ok(head) => build_response(head.status, head.headers, Body::empty()),
            Err(rejected) => rejected,
        }
    }

    /// Status and headers for `plan`, or the finished 416 response.
    fn response_head(
        &self,
        descriptor: &MediaDescriptor,
        plan: RangePlan,
        policy: &ChunkingPolicy,
    ) -> Result<ResponseHead, Response> {
        let (window, status, length) = match plan {
            RangePlan::Unsatisfiable { total_size } => {
                info!(
                    "Rejecting out-of-range request for {} ({} bytes)",
                    descriptor.id, total_size
                );
                return Err(range_not_satisfiable(total_size));
            }
            RangePlan::Full => (None, StatusCode::OK, descriptor.total_size),
            RangePlan::Partial(range) => (Some(range), StatusCode::PARTIAL_CONTENT, range.len()),
        };

        Ok(ResponseHead {
            status,
            headers: self.response_headers(descriptor, window, length, policy),
            window,
            length,
        })
    }

    async fn open_upstream(
        &self,
        descriptor: &MediaDescriptor,
        window: Option<ByteRange>,
        policy: &ChunkingPolicy,
    ) -> Result<UpstreamBody, RelayError> {
        let opened = tokio::time::timeout(
            policy.upstream_timeout,
            self.source.open(&descriptor.upstream_url, window),
        )
        .await;

        let failure = match opened {
            Ok(Ok(body)) if accepts_status(window, body.status) => return Ok(body),
            Ok(Ok(body)) => (
                AbortReason::UpstreamStatus {
                    status: body.status,
                },
                RelayError::UpstreamStatus {
                    status: body.status,
                },
            ),
            Ok(Err(SourceError::Timeout)) | Err(_) => (
                AbortReason::UpstreamTimeout,
                RelayError::UpstreamTimeout {
                    timeout_ms: millis(policy.upstream_timeout),
                },
            ),
            Ok(Err(e)) => (
                AbortReason::UpstreamRead {
                    reason: e.to_string(),
                },
                RelayError::Open(e),
            ),
        };

        let (reason, err) = failure;
        error!(
            "Opening {} on {} failed: {}",
            descriptor.id,
            descriptor.upstream_host(),
            reason
        );
        self.metrics.record_started();
        self.metrics
            .record_outcome(&SessionOutcome::Aborted { reason, bytes: 0 });
        Err(err)
    }

    fn response_headers(
        &self,
        descriptor: &MediaDescriptor,
        window: Option<ByteRange>,
        length: u64,
        policy: &ChunkingPolicy,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let content_type = HeaderValue::from_str(&descriptor.classified_content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM));
        headers.insert(header::CONTENT_TYPE, content_type);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(policy.cache_control()),
        );

        if let Some(range) = window {
            if let Ok(value) = HeaderValue::from_str(&range.content_range()) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }

        self.decorators.apply(descriptor, &mut headers);
        headers
    }
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("decorators", &self.decorators)
            .finish_non_exhaustive()
    }
}

/// Full transfers need the whole object; a window can be cut from either a
/// 206 or a full 200.
fn accepts_status(window: Option<ByteRange>, status: u16) -> bool {
    match window {
        None => status == 200,
        Some(_) => status == 200 || status == 206,
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn range_not_satisfiable(total_size: u64) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total_size}")) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
    build_response(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty())
}
