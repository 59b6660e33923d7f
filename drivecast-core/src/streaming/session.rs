//! One proxied transfer: a single upstream body relayed to one downstream
//! response.
//!
//! A [`StreamSession`] owns its upstream body stream exclusively and is
//! itself the downstream body. It re-chunks upstream frames to the policy's
//! chunk size, never holding more than one chunk, and is only polled when
//! the downstream connection can take more bytes, so the upstream is read
//! no faster than the client drains it.
//!
//! The session ends in exactly one recorded outcome. The upstream body is
//! dropped (releasing its connection) on completion, on upstream failure,
//! and, through `Drop`, when the client goes away mid-transfer.
//!
//! The body is polled by the HTTP server after the request future has
//! returned, so the session carries the request span with it and enters it
//! whenever it runs.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::time::{Instant, Sleep, sleep};
use tracing::{Span, debug, error, info, warn};
use uuid::Uuid;

use super::metrics::RelayMetrics;
use super::policy::ChunkingPolicy;

/// Why a session stopped before delivering every byte it promised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// Download URL answered with a status the relay cannot serve.
    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16 },

    /// Reading the upstream body failed.
    #[error("upstream read failed: {reason}")]
    UpstreamRead { reason: String },

    /// No upstream bytes arrived within the idle timeout.
    #[error("upstream timed out")]
    UpstreamTimeout,

    /// Upstream body ended before the promised length.
    #[error("upstream ended {missing} bytes early")]
    UpstreamTruncated { missing: u64 },

    /// Downstream dropped the response body.
    #[error("client disconnected")]
    ClientDisconnected,
}

/// Final state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every promised byte was handed downstream.
    Complete { bytes: u64 },
    /// The session stopped early after relaying `bytes`.
    Aborted { reason: AbortReason, bytes: u64 },
}

/// Downstream body relaying one upstream byte window.
pub struct StreamSession {
    id: Uuid,
    file_id: String,
    upstream: Option<BoxStream<'static, Result<Bytes, io::Error>>>,
    /// Unconsumed tail of the last upstream frame
    pending: Option<Bytes>,
    buffer: BytesMut,
    chunk_size: usize,
    /// Leading upstream bytes to discard before relaying
    skip: u64,
    /// Bytes still owed downstream that have not entered the buffer
    remaining: u64,
    relayed: u64,
    idle_timeout: Duration,
    deadline: Pin<Box<Sleep>>,
    /// Set while the last chunk is with the client; the idle deadline
    /// restarts on the next poll
    waiting: bool,
    span: Span,
    metrics: Arc<RelayMetrics>,
    outcome: Option<SessionOutcome>,
}

impl StreamSession {
    /// Starts a session over an opened upstream body.
    ///
    /// `skip` bytes are discarded from the front of the upstream body (used
    /// when the upstream ignored a `Range` request and sent the whole
    /// object), then exactly `length` bytes are relayed. The current span is
    /// captured and re-entered for all later logging.
    pub fn new(
        id: Uuid,
        file_id: impl Into<String>,
        upstream: BoxStream<'static, Result<Bytes, io::Error>>,
        skip: u64,
        length: u64,
        policy: &ChunkingPolicy,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let chunk_size = policy.chunk_size as usize;
        let initial_capacity = usize::try_from(length).unwrap_or(usize::MAX).min(chunk_size);
        let file_id = file_id.into();

        metrics.record_started();
        info!(
            "Session {} for {} started: {} bytes, {} byte chunks",
            id, file_id, length, chunk_size
        );

        Self {
            id,
            file_id,
            upstream: Some(upstream),
            pending: None,
            buffer: BytesMut::with_capacity(initial_capacity),
            chunk_size,
            skip,
            remaining: length,
            relayed: 0,
            idle_timeout: policy.upstream_timeout,
            deadline: Box::pin(sleep(policy.upstream_timeout)),
            waiting: true,
            span: Span::current(),
            metrics,
            outcome: None,
        }
    }

    /// Session identifier, shared with the request span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Final outcome, once the session has ended.
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    fn rearm(&mut self) {
        let deadline = Instant::now() + self.idle_timeout;
        self.deadline.as_mut().reset(deadline);
    }

    /// Moves bytes from an upstream frame into the chunk buffer.
    ///
    /// Returns a chunk when one is ready to go downstream.
    fn absorb(&mut self, mut frame: Bytes) -> Option<Bytes> {
        if self.skip > 0 {
            let skipped = self.skip.min(frame.len() as u64) as usize;
            frame.advance(skipped);
            self.skip -= skipped as u64;
        }
        if frame.is_empty() {
            return None;
        }
        if frame.len() as u64 > self.remaining {
            frame.truncate(self.remaining as usize);
        }

        // Whole chunks pass through without copying.
        if self.buffer.is_empty() && frame.len() >= self.chunk_size {
            let chunk = frame.split_to(self.chunk_size);
            if !frame.is_empty() {
                self.pending = Some(frame);
            }
            self.remaining -= chunk.len() as u64;
            return Some(self.emit(chunk));
        }

        let take = (self.chunk_size - self.buffer.len()).min(frame.len());
        self.buffer.reserve(take);
        self.buffer.extend_from_slice(&frame[..take]);
        self.remaining -= take as u64;
        frame.advance(take);
        if !frame.is_empty() {
            self.pending = Some(frame);
        }

        if self.buffer.len() == self.chunk_size || self.remaining == 0 {
            Some(self.emit_buffer())
        } else {
            None
        }
    }

    fn emit_buffer(&mut self) -> Bytes {
        let chunk = self.buffer.split().freeze();
        self.emit(chunk)
    }

    fn emit(&mut self, chunk: Bytes) -> Bytes {
        self.relayed += chunk.len() as u64;
        self.metrics.record_chunk(chunk.len());
        debug!(
            "Session {} relayed {} bytes ({} total)",
            self.id,
            chunk.len(),
            self.relayed
        );

        // The last byte may be the last thing the server polls for.
        if self.remaining == 0 && self.buffer.is_empty() && self.pending.is_none() {
            self.finish(SessionOutcome::Complete {
                bytes: self.relayed,
            });
        }
        chunk
    }

    fn abort(&mut self, reason: AbortReason) -> io::Error {
        let kind = match reason {
            AbortReason::UpstreamTimeout => io::ErrorKind::TimedOut,
            AbortReason::UpstreamTruncated { .. } => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::Other,
        };
        let err = io::Error::new(kind, reason.to_string());
        self.finish(SessionOutcome::Aborted {
            reason,
            bytes: self.relayed,
        });
        err
    }

    fn finish(&mut self, outcome: SessionOutcome) {
        if self.outcome.is_some() {
            return;
        }

        // Releases the upstream connection.
        self.upstream = None;
        self.pending = None;
        self.buffer = BytesMut::new();

        match &outcome {
            SessionOutcome::Complete { bytes } => {
                info!("Session {} for {} complete: {} bytes", self.id, self.file_id, bytes);
            }
            SessionOutcome::Aborted {
                reason: AbortReason::ClientDisconnected,
                bytes,
            } => {
                warn!(
                    "Session {} for {} closed by client after {} bytes",
                    self.id, self.file_id, bytes
                );
            }
            SessionOutcome::Aborted { reason, bytes } => {
                error!(
                    "Session {} for {} aborted after {} bytes: {}",
                    self.id, self.file_id, bytes, reason
                );
            }
        }

        self.metrics.record_outcome(&outcome);
        self.outcome = Some(outcome);
    }

    fn poll_relay(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, io::Error>>> {
        if self.outcome.is_some() {
            return Poll::Ready(None);
        }

        loop {
            if self.remaining == 0 && self.pending.is_none() {
                if !self.buffer.is_empty() {
                    return Poll::Ready(Some(Ok(self.emit_buffer())));
                }
                self.finish(SessionOutcome::Complete {
                    bytes: self.relayed,
                });
                return Poll::Ready(None);
            }

            if let Some(frame) = self.pending.take() {
                if self.remaining == 0 {
                    continue;
                }
                if let Some(chunk) = self.absorb(frame) {
                    return Poll::Ready(Some(Ok(chunk)));
                }
                continue;
            }

            let polled = self
                .upstream
                .as_mut()
                .map(|upstream| upstream.as_mut().poll_next(cx));

            match polled {
                None => {
                    if !self.buffer.is_empty() {
                        return Poll::Ready(Some(Ok(self.emit_buffer())));
                    }
                    let missing = self.remaining;
                    let err = self.abort(AbortReason::UpstreamTruncated { missing });
                    return Poll::Ready(Some(Err(err)));
                }
                Some(Poll::Ready(Some(Ok(frame)))) => {
                    self.rearm();
                    self.pending = Some(frame);
                }
                Some(Poll::Ready(Some(Err(e)))) => {
                    let err = self.abort(AbortReason::UpstreamRead {
                        reason: e.to_string(),
                    });
                    return Poll::Ready(Some(Err(err)));
                }
                Some(Poll::Ready(None)) => {
                    self.upstream = None;
                }
                Some(Poll::Pending) => {
                    // Hand over what is buffered rather than wait for a full chunk.
                    if !self.buffer.is_empty() {
                        return Poll::Ready(Some(Ok(self.emit_buffer())));
                    }
                    if self.deadline.as_mut().poll(cx).is_ready() {
                        let err = self.abort(AbortReason::UpstreamTimeout);
                        return Poll::Ready(Some(Err(err)));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl Stream for StreamSession {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let span = this.span.clone();
        let _entered = span.enter();

        // Only time spent waiting on upstream counts toward the idle timeout.
        if this.waiting {
            this.waiting = false;
            this.rearm();
        }

        let polled = this.poll_relay(cx);
        if matches!(polled, Poll::Ready(Some(Ok(_)))) {
            this.waiting = true;
        }
        polled
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            let span = self.span.clone();
            let _entered = span.enter();
            self.finish(SessionOutcome::Aborted {
                reason: AbortReason::ClientDisconnected,
                bytes: self.relayed,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::{self, StreamExt};

    use super::*;
    use crate::config::StreamingConfig;

    fn policy(chunk_size: u32) -> ChunkingPolicy {
        let mut policy = ChunkingPolicy::for_file(1024, "video/mp4", &StreamingConfig::default());
        policy.chunk_size = chunk_size;
        policy.upstream_timeout = Duration::from_secs(5);
        policy
    }

    fn frames(sizes: &[usize]) -> BoxStream<'static, Result<Bytes, io::Error>> {
        let mut next = 0u8;
        let frames: Vec<Result<Bytes, io::Error>> = sizes
            .iter()
            .map(|&size| {
                let frame: Vec<u8> = (0..size)
                    .map(|_| {
                        next = next.wrapping_add(1);
                        next
                    })
                    .collect();
                Ok(Bytes::from(frame))
            })
            .collect();
        stream::iter(frames).boxed()
    }

    async fn collect(session: &mut StreamSession) -> (Vec<Bytes>, Option<io::Error>) {
        let mut chunks = Vec::new();
        while let Some(item) = session.next().await {
            match item {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => return (chunks, Some(e)),
            }
        }
        (chunks, None)
    }

    #[tokio::test]
    async fn test_rechunks_to_policy_size() {
        let metrics = Arc::new(RelayMetrics::new());
        let upstream = frames(&[3, 10, 1, 7, 9]);
        let mut session = StreamSession::new(
            Uuid::new_v4(),
            "f",
            upstream,
            0,
            30,
            &policy(8),
            metrics.clone(),
        );

        let (chunks, err) = collect(&mut session).await;
        assert!(err.is_none());
        assert!(chunks.iter().all(|c| c.len() <= 8));

        let body: Vec<u8> = chunks.concat();
        let expected: Vec<u8> = (1..=30u8).collect();
        assert_eq!(body, expected);
        assert_eq!(session.outcome(), Some(&SessionOutcome::Complete { bytes: 30 }));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_completed, 1);
        assert!(snapshot.peak_chunk_bytes <= 8);
    }

    #[tokio::test]
    async fn test_skip_and_cap_make_window_exact() {
        // Upstream ignored the range and sent all 40 bytes; relay bytes 11..=20.
        let metrics = Arc::new(RelayMetrics::new());
        let upstream = frames(&[6, 6, 28]);
        let mut session = StreamSession::new(
            Uuid::new_v4(),
            "f",
            upstream,
            10,
            10,
            &policy(4),
            metrics,
        );

        let (chunks, err) = collect(&mut session).await;
        assert!(err.is_none());
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, (11..=20u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_completion_is_recorded_on_last_byte() {
        let metrics = Arc::new(RelayMetrics::new());
        let upstream = frames(&[16]);
        let mut session = StreamSession::new(
            Uuid::new_v4(),
            "f",
            upstream,
            0,
            16,
            &policy(16),
            metrics.clone(),
        );

        let first = session.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 16);
        assert!(matches!(session.outcome(), Some(SessionOutcome::Complete { .. })));

        drop(session);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_completed, 1);
        assert_eq!(snapshot.client_disconnects, 0);
    }

    #[tokio::test]
    async fn test_truncated_upstream_aborts_once() {
        let metrics = Arc::new(RelayMetrics::new());
        let upstream = frames(&[5, 5]);
        let mut session = StreamSession::new(
            Uuid::new_v4(),
            "f",
            upstream,
            0,
            20,
            &policy(4),
            metrics.clone(),
        );

        let (chunks, err) = collect(&mut session).await;
        let relayed: usize = chunks.iter().map(Bytes::len).sum();
        assert_eq!(relayed, 10);
        assert_eq!(err.unwrap().kind(), io::ErrorKind::UnexpectedEof);
        assert!(session.next().await.is_none());

        drop(session);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_aborted, 1);
        assert_eq!(snapshot.upstream_failures, 1);
        assert_eq!(snapshot.client_disconnects, 0);
    }

    #[tokio::test]
    async fn test_upstream_read_error_aborts() {
        let metrics = Arc::new(RelayMetrics::new());
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"abcd")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never")),
        ])
        .boxed();
        let mut session = StreamSession::new(
            Uuid::new_v4(),
            "f",
            upstream,
            0,
            100,
            &policy(64),
            metrics.clone(),
        );

        let (chunks, err) = collect(&mut session).await;
        assert_eq!(chunks.concat(), b"abcd".to_vec());
        assert!(err.is_some());
        assert!(matches!(
            session.outcome(),
            Some(SessionOutcome::Aborted {
                reason: AbortReason::UpstreamRead { .. },
                bytes: 4
            })
        ));
        assert_eq!(metrics.snapshot().sessions_aborted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_upstream_times_out() {
        let metrics = Arc::new(RelayMetrics::new());
        let upstream = stream::iter(vec![Ok(Bytes::from_static(b"head"))])
            .chain(stream::pending())
            .boxed();
        let mut session = StreamSession::new(
            Uuid::new_v4(),
            "f",
            upstream,
            0,
            100,
            &policy(64),
            metrics.clone(),
        );

        let (chunks, err) = collect(&mut session).await;
        assert_eq!(chunks.concat(), b"head".to_vec());
        assert_eq!(err.unwrap().kind(), io::ErrorKind::TimedOut);
        assert_eq!(metrics.snapshot().upstream_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_pause_does_not_count_as_upstream_idle() {
        let metrics = Arc::new(RelayMetrics::new());
        let upstream: BoxStream<'static, Result<Bytes, io::Error>> =
            stream::iter(vec![Ok(Bytes::from_static(b"abcd"))])
                .chain(stream::once(async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(Bytes::from_static(b"efgh"))
                }))
                .boxed();
        let mut session =
            StreamSession::new(Uuid::new_v4(), "f", upstream, 0, 8, &policy(4), metrics.clone());

        assert_eq!(session.next().await.unwrap().unwrap(), Bytes::from_static(b"abcd"));

        // The player sits on the first chunk past the 5 s idle timeout.
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(session.next().await.unwrap().unwrap(), Bytes::from_static(b"efgh"));
        assert_eq!(session.outcome(), Some(&SessionOutcome::Complete { bytes: 8 }));
        assert_eq!(metrics.snapshot().upstream_failures, 0);
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_late_logs_carry_the_request_span() {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let id = Uuid::new_v4();
        let span = tracing::info_span!("stream", session = %id);
        let metrics = Arc::new(RelayMetrics::new());
        let mut session = span.in_scope(|| {
            StreamSession::new(id, "f", frames(&[8, 8]), 0, 16, &policy(8), metrics)
        });
        assert_eq!(session.id(), id);

        // Polled and dropped outside the span, as the HTTP server does.
        session.next().await.unwrap().unwrap();
        drop(session);

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let closed = logs
            .lines()
            .find(|line| line.contains("closed by client"))
            .unwrap();
        assert!(closed.contains(&format!("stream{{session={id}}}")));
    }

    #[tokio::test]
    async fn test_drop_mid_stream_counts_client_disconnect() {
        let metrics = Arc::new(RelayMetrics::new());
        let upstream = frames(&[8, 8, 8]);
        let mut session = StreamSession::new(
            Uuid::new_v4(),
            "f",
            upstream,
            0,
            24,
            &policy(8),
            metrics.clone(),
        );

        let first = session.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 8);
        drop(session);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_aborted, 1);
        assert_eq!(snapshot.client_disconnects, 1);
        assert_eq!(snapshot.sessions_completed, 0);
    }
}
