//! Relay counters shared by all stream sessions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::session::{AbortReason, SessionOutcome};

/// Lock-free counters updated as sessions start and finish.
///
/// Holds no per-session state; every field is a monotonic counter or a
/// high-water mark.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_aborted: AtomicU64,
    client_disconnects: AtomicU64,
    upstream_failures: AtomicU64,
    bytes_relayed: AtomicU64,
    peak_chunk_bytes: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayMetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub client_disconnects: u64,
    pub upstream_failures: u64,
    pub bytes_relayed: u64,
    pub peak_chunk_bytes: u64,
}

impl RelayMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk(&self, len: usize) {
        let len = len as u64;
        self.bytes_relayed.fetch_add(len, Ordering::Relaxed);
        self.peak_chunk_bytes.fetch_max(len, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: &SessionOutcome) {
        match outcome {
            SessionOutcome::Complete { .. } => {
                self.sessions_completed.fetch_add(1, Ordering::Relaxed);
            }
            SessionOutcome::Aborted { reason, .. } => {
                self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
                if matches!(reason, AbortReason::ClientDisconnected) {
                    self.client_disconnects.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.upstream_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Returns the current counter values.
    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            client_disconnects: self.client_disconnects.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            peak_chunk_bytes: self.peak_chunk_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_bucketed() {
        let metrics = RelayMetrics::new();
        metrics.record_started();
        metrics.record_started();
        metrics.record_started();
        metrics.record_chunk(10);
        metrics.record_chunk(4);
        metrics.record_outcome(&SessionOutcome::Complete { bytes: 14 });
        metrics.record_outcome(&SessionOutcome::Aborted {
            reason: AbortReason::ClientDisconnected,
            bytes: 0,
        });
        metrics.record_outcome(&SessionOutcome::Aborted {
            reason: AbortReason::UpstreamTimeout,
            bytes: 0,
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_started, 3);
        assert_eq!(snapshot.sessions_completed, 1);
        assert_eq!(snapshot.sessions_aborted, 2);
        assert_eq!(snapshot.client_disconnects, 1);
        assert_eq!(snapshot.upstream_failures, 1);
        assert_eq!(snapshot.bytes_relayed, 14);
        assert_eq!(snapshot.peak_chunk_bytes, 10);
    }
}
