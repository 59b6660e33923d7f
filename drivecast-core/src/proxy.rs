//! Request orchestration for one proxied stream.
//!
//! [`MediaProxy::serve`] walks a request through resolve, negotiate, and
//! relay. Failures before the response head map to [`DrivecastError`];
//! failures after it only end the body.

use std::sync::Arc;

use axum::response::Response;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::DrivecastError;
use crate::config::{DrivecastConfig, StreamingConfig};
use crate::streaming::{
    ChunkingPolicy, DecoratorChain, RangeNegotiator, RelayEngine, RelayMetrics,
};
use crate::upstream::{Credential, GraphResolver, HttpByteSource, ResolveError, UpstreamResolver};

/// One incoming stream request, already lifted out of HTTP.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// Opaque upstream file id
    pub file_id: String,
    /// Bearer credential, if the client supplied one
    pub credential: Option<Credential>,
    /// Raw `Range` header value
    pub range_header: Option<String>,
    /// Advisory quality hint; accepted but does not change the response
    pub quality: Option<String>,
    /// `HEAD` request: answer with headers only, never open the download URL
    pub headers_only: bool,
}

impl StreamRequest {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            ..Default::default()
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_range(mut self, range_header: impl Into<String>) -> Self {
        self.range_header = Some(range_header.into());
        self
    }

    pub fn headers_only(mut self) -> Self {
        self.headers_only = true;
        self
    }
}

/// Resolves, negotiates, and relays stream requests.
///
/// Holds only immutable configuration and shared counters, so a single
/// instance serves all concurrent requests.
pub struct MediaProxy {
    resolver: Arc<dyn UpstreamResolver>,
    relay: RelayEngine,
    streaming: StreamingConfig,
}

impl MediaProxy {
    /// Creates a proxy from explicit components.
    pub fn new(
        resolver: Arc<dyn UpstreamResolver>,
        relay: RelayEngine,
        streaming: StreamingConfig,
    ) -> Self {
        Self {
            resolver,
            relay,
            streaming,
        }
    }

    /// Creates a proxy talking to the configured upstream over HTTP.
    ///
    /// Metadata and download requests share one connection pool. Download
    /// requests carry no overall timeout; the relay applies the per-read
    /// idle timeout from the chunking policy instead.
    ///
    /// # Errors
    ///
    /// - `DrivecastError::Configuration` - HTTP client could not be built
    pub fn from_config(config: &DrivecastConfig) -> Result<Self, DrivecastError> {
        let client = reqwest::Client::builder()
            .user_agent(config.upstream.user_agent)
            .connect_timeout(config.upstream.connect_timeout)
            .build()
            .map_err(|e| DrivecastError::Configuration {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        let decorators = if config.streaming.compatibility_headers {
            DecoratorChain::standard()
        } else {
            DecoratorChain::empty()
        };
        let resolver = GraphResolver::with_client(client.clone(), &config.upstream);
        let relay = RelayEngine::new(
            Arc::new(HttpByteSource::new(client)),
            Arc::new(RelayMetrics::new()),
        )
        .with_decorators(decorators);

        Ok(Self::new(
            Arc::new(resolver),
            relay,
            config.streaming.clone(),
        ))
    }

    /// Shared relay counters.
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.relay.metrics()
    }

    /// Serves one stream request.
    ///
    /// Everything logged for the request, including by the response body
    /// after this returns, runs in a `stream` span keyed by the session id.
    ///
    /// # Errors
    ///
    /// - `DrivecastError::Resolve` - Missing credential or metadata failure
    /// - `DrivecastError::Relay` - Download URL unusable before the first byte
    pub async fn serve(&self, request: StreamRequest) -> Result<Response, DrivecastError> {
        let session_id = Uuid::new_v4();
        let span = info_span!(
            "stream",
            session = %session_id,
            file_id = %request.file_id
        );
        self.serve_request(session_id, request).instrument(span).await
    }

    async fn serve_request(
        &self,
        session_id: Uuid,
        request: StreamRequest,
    ) -> Result<Response, DrivecastError> {
        let credential = request.credential.ok_or(ResolveError::Unauthorized)?;

        if let Some(quality) = &request.quality {
            debug!("Quality hint {:?} accepted without transcoding", quality);
        }

        let descriptor = self.resolver.resolve(&request.file_id, &credential).await?;
        if !descriptor.media_kind.is_media() {
            debug!(
                "{} is not a recognized media file, relaying as {}",
                descriptor.declared_name, descriptor.classified_content_type
            );
        }
        let policy = ChunkingPolicy::select(&descriptor, &self.streaming);
        let plan = RangeNegotiator::new(&policy, self.streaming.out_of_range)
            .negotiate(request.range_header.as_deref(), descriptor.total_size);

        info!(
            "Streaming {} ({:?}, {} bytes, {:?}) as {:?}",
            descriptor.id, descriptor.media_kind, descriptor.total_size, policy.size_class, plan
        );

        if request.headers_only {
            return Ok(self.relay.head(&descriptor, plan, &policy));
        }

        let response = self.relay.stream(session_id, &descriptor, plan, &policy).await?;
        Ok(response)
    }
}

impl std::fmt::Debug for MediaProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaProxy")
            .field("relay", &self.relay)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::http::{StatusCode, header};
    use bytes::Bytes;
    use futures::StreamExt;
    use futures::stream;
    use url::Url;

    use super::*;
    use crate::streaming::ByteRange;
    use crate::upstream::{ByteSource, MediaDescriptor, SourceError, UpstreamBody};

    struct FixedResolver {
        name: &'static str,
        size: u64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamResolver for FixedResolver {
        async fn resolve(
            &self,
            file_id: &str,
            credential: &Credential,
        ) -> Result<MediaDescriptor, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if credential.token() != "good" {
                return Err(ResolveError::Unauthorized);
            }
            if file_id == "missing" {
                return Err(ResolveError::NotFound {
                    file_id: file_id.to_string(),
                });
            }
            let url = Url::parse("https://files.example.net/dl").unwrap();
            Ok(MediaDescriptor::new(file_id, self.name, self.size, "", url))
        }
    }

    /// Serves `size` bytes of `i % 256`, honoring the requested window.
    struct PatternSource;

    #[async_trait]
    impl ByteSource for PatternSource {
        async fn open(
            &self,
            _url: &Url,
            window: Option<ByteRange>,
        ) -> Result<UpstreamBody, SourceError> {
            let (status, start, end) = match window {
                Some(range) => (206, range.start, range.end),
                None => (200, 0, 9_999),
            };
            let data: Vec<u8> = (start..=end).map(|i| (i % 256) as u8).collect();
            Ok(UpstreamBody {
                status,
                stream: stream::iter(vec![Ok(Bytes::from(data))]).boxed(),
            })
        }
    }

    fn proxy(name: &'static str, size: u64) -> (MediaProxy, Arc<FixedResolver>) {
        let resolver = Arc::new(FixedResolver {
            name,
            size,
            calls: AtomicUsize::new(0),
        });
        let relay = RelayEngine::new(Arc::new(PatternSource), Arc::new(RelayMetrics::new()));
        let proxy = MediaProxy::new(
            resolver.clone(),
            relay,
            StreamingConfig::deterministic_testing(),
        );
        (proxy, resolver)
    }

    fn good() -> Credential {
        Credential::bearer("good").unwrap()
    }

    #[tokio::test]
    async fn test_missing_credential_skips_upstream() {
        let (proxy, resolver) = proxy("clip.mp4", 10_000);

        let err = proxy.serve(StreamRequest::new("item")).await.unwrap_err();

        assert!(matches!(err, DrivecastError::Resolve(ResolveError::Unauthorized)));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_errors_propagate() {
        let (proxy, _) = proxy("clip.mp4", 10_000);

        let err = proxy
            .serve(StreamRequest::new("missing").with_credential(good()))
            .await
            .unwrap_err();
        assert!(matches!(err, DrivecastError::Resolve(ResolveError::NotFound { .. })));

        let err = proxy
            .serve(StreamRequest::new("item").with_credential(Credential::bearer("bad").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, DrivecastError::Resolve(ResolveError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_clamped_range_is_served() {
        let (proxy, _) = proxy("clip.mp4", 10_000);

        let response = proxy
            .serve(
                StreamRequest::new("item")
                    .with_credential(good())
                    .with_range("bytes=50000-"),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 0-9999/10000"
        );
    }

    #[tokio::test]
    async fn test_large_file_window_is_bounded() {
        // 100 KiB is large under the testing preset: 4 chunks of 4 KiB per window.
        let (proxy, _) = proxy("clip.mp4", 100 * 1024);

        let response = proxy
            .serve(
                StreamRequest::new("item")
                    .with_credential(good())
                    .with_range("bytes=1000-"),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 1000-17383/102400"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.len(), 16384);
        assert_eq!(body[0], (1000 % 256) as u8);
    }

    #[tokio::test]
    async fn test_headers_only_request_never_starts_a_session() {
        let (proxy, resolver) = proxy("clip.mp4", 10_000);

        let response = proxy
            .serve(
                StreamRequest::new("item")
                    .with_credential(good())
                    .with_range("bytes=0-99")
                    .headers_only(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "100");
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 0-99/10000"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        let metrics = proxy.metrics().snapshot();
        assert_eq!(metrics.sessions_started, 0);
        assert_eq!(metrics.sessions_aborted, 0);
    }
}
