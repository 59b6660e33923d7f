//! HTTP `Range` negotiation for proxied media.
//!
//! Interprets the client's `Range` header against the object size and
//! decides between a full transfer and one partial window. Negotiation never
//! fails: anything it cannot serve as a single window degrades to a full
//! transfer, because a playing video is better than an error page.
//!
//! Start offsets past the end of the file are clamped back to zero under
//! [`OutOfRangePolicy::Clamp`] (the default) rather than rejected, which
//! keeps players running after a bad seek. [`OutOfRangePolicy::Reject`]
//! answers those with `416` instead.

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OutOfRangePolicy;
use crate::streaming::policy::ChunkingPolicy;

/// Inclusive byte window `[start, end]` of an object of `total_size` bytes.
///
/// Always satisfies `start <= end < total_size` when produced by the negotiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
}

impl ByteRange {
    /// Number of bytes in the window.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a window holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for an upstream `Range` request header.
    pub fn to_range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Value for the downstream `Content-Range` response header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total_size)
    }
}

/// Outcome of range negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePlan {
    /// Serve the whole object with status 200
    Full,
    /// Serve one window with status 206
    Partial(ByteRange),
    /// Start lies past the end and the policy rejects it (status 416)
    Unsatisfiable { total_size: u64 },
}

/// Reasons a `Range` header was not usable as a single window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("range unit is not bytes")]
    UnsupportedUnit,

    #[error("multiple ranges are not supported")]
    MultiRange,

    #[error("malformed range specification")]
    Malformed,
}

/// Raw bounds parsed from `bytes=<start>-<end>`; either side may be omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Parses a single-range `Range` header value.
///
/// # Errors
///
/// - `RangeParseError::UnsupportedUnit` - Unit other than `bytes`
/// - `RangeParseError::MultiRange` - More than one range listed
/// - `RangeParseError::Malformed` - Missing `-` or non-numeric bounds
pub fn parse_range_header(value: &str) -> Result<RangeSpec, RangeParseError> {
    let (unit, ranges) = value
        .trim()
        .split_once('=')
        .ok_or(RangeParseError::Malformed)?;

    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(RangeParseError::UnsupportedUnit);
    }
    if ranges.contains(',') {
        return Err(RangeParseError::MultiRange);
    }

    let (start, end) = ranges.split_once('-').ok_or(RangeParseError::Malformed)?;

    Ok(RangeSpec {
        start: parse_bound(start)?,
        end: parse_bound(end)?,
    })
}

fn parse_bound(raw: &str) -> Result<Option<u64>, RangeParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| RangeParseError::Malformed)
}

/// Negotiates `Range` headers for one stream session.
#[derive(Debug, Clone, Copy)]
pub struct RangeNegotiator {
    out_of_range: OutOfRangePolicy,
    max_window: Option<u64>,
}

impl RangeNegotiator {
    /// Creates a negotiator bounded by the session's chunking policy.
    pub fn new(policy: &ChunkingPolicy, out_of_range: OutOfRangePolicy) -> Self {
        Self {
            out_of_range,
            max_window: policy.max_window_bytes(),
        }
    }

    /// Creates a negotiator with no window bound.
    pub fn unbounded(out_of_range: OutOfRangePolicy) -> Self {
        Self {
            out_of_range,
            max_window: None,
        }
    }

    /// Resolves the `Range` header against the object size.
    pub fn negotiate(&self, range_header: Option<&str>, total_size: u64) -> RangePlan {
        let Some(raw) = range_header else {
            return RangePlan::Full;
        };

        if total_size == 0 {
            debug!("Ignoring range {:?} on empty object", raw);
            return RangePlan::Full;
        }

        let spec = match parse_range_header(raw) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Serving full object for range {:?}: {}", raw, e);
                return RangePlan::Full;
            }
        };

        let last = total_size - 1;
        let mut start = spec.start.unwrap_or(0);
        let mut end = spec.end.unwrap_or(last);

        if start >= total_size {
            match self.out_of_range {
                OutOfRangePolicy::Clamp => {
                    debug!("Range start {} past end of {} bytes, restarting at 0", start, total_size);
                    start = 0;
                }
                OutOfRangePolicy::Reject => return RangePlan::Unsatisfiable { total_size },
            }
        }
        end = end.min(last);

        if start > end {
            warn!("Serving full object for inverted range {:?}", raw);
            return RangePlan::Full;
        }

        if let Some(max_window) = self.max_window {
            if end - start + 1 > max_window {
                end = start + max_window - 1;
            }
        }

        RangePlan::Partial(ByteRange {
            start,
            end,
            total_size,
        })
    }
}
