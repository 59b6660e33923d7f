//! Range-aware relay of upstream media bytes.
//!
//! A request flows through the pieces in this order: the descriptor's
//! classified type and size select a [`ChunkingPolicy`], the
//! [`RangeNegotiator`] turns the client's `Range` header into a
//! [`RangePlan`], and the [`RelayEngine`] opens the upstream and hands back
//! a response whose body is a [`StreamSession`].

pub mod decorators;
pub mod media_type;
pub mod metrics;
pub mod policy;
pub mod range;
pub mod relay;
pub mod session;

pub use decorators::{DecoratorChain, MatroskaCompatibility, ResponseDecorator};
pub use media_type::{MediaKind, classify, is_matroska};
pub use metrics::{RelayMetrics, RelayMetricsSnapshot};
pub use policy::{ChunkingPolicy, SizeClass};
pub use range::{ByteRange, RangeNegotiator, RangeParseError, RangePlan, parse_range_header};
pub use relay::{RelayEngine, RelayError};
pub use session::{AbortReason, SessionOutcome, StreamSession};
