//! Size classes, chunk sizes, and upstream timeouts.
//!
//! One [`ChunkingPolicy`] is selected per stream session from the file's
//! size class and container. It fixes the chunk size the relay emits, the
//! idle timeout applied to every upstream wait, and (for large files) how
//! many chunks a single ranged response may span.

use std::time::Duration;

use crate::config::StreamingConfig;
use crate::streaming::media_type::is_matroska;
use crate::upstream::MediaDescriptor;

/// Size class of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// At or below the large-file threshold
    Small,
    /// Above the large-file threshold
    Large,
}

impl SizeClass {
    /// Classifies a file size against the threshold.
    pub fn of(total_size: u64, large_file_threshold: u64) -> Self {
        if total_size > large_file_threshold {
            SizeClass::Large
        } else {
            SizeClass::Small
        }
    }
}

/// Chunking and timeout parameters for one stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPolicy {
    pub size_class: SizeClass,
    /// Maximum bytes per emitted chunk, and the relay's buffer bound
    pub chunk_size: u32,
    /// Idle timeout for opening the upstream and for each upstream read
    pub upstream_timeout: Duration,
    /// Chunk budget for one ranged response on a large file
    pub max_window_chunks: u32,
}

impl ChunkingPolicy {
    /// Selects the policy for a resolved descriptor.
    pub fn select(descriptor: &MediaDescriptor, config: &StreamingConfig) -> Self {
        Self::for_file(
            descriptor.total_size,
            &descriptor.classified_content_type,
            config,
        )
    }

    /// Selects the policy from a size and classified content type.
    ///
    /// Large Matroska files get the smaller Matroska chunk size.
    pub fn for_file(total_size: u64, content_type: &str, config: &StreamingConfig) -> Self {
        let size_class = SizeClass::of(total_size, config.large_file_threshold);

        let (chunk_size, upstream_timeout) = match size_class {
            SizeClass::Small => (config.small_chunk_size, config.small_stream_timeout),
            SizeClass::Large if is_matroska(content_type) => {
                (config.matroska_chunk_size, config.large_stream_timeout)
            }
            SizeClass::Large => (config.large_chunk_size, config.large_stream_timeout),
        };

        Self {
            size_class,
            chunk_size: chunk_size.max(1),
            upstream_timeout,
            max_window_chunks: config.max_window_chunks.max(1),
        }
    }

    /// Largest span one ranged response may cover, if bounded.
    pub fn max_window_bytes(&self) -> Option<u64> {
        match self.size_class {
            SizeClass::Small => None,
            SizeClass::Large => {
                Some(u64::from(self.chunk_size) * u64::from(self.max_window_chunks))
            }
        }
    }

    /// `Cache-Control` value for responses under this policy.
    ///
    /// Large bodies are marked non-cacheable so intermediaries do not try
    /// to buffer them.
    pub fn cache_control(&self) -> &'static str {
        match self.size_class {
            SizeClass::Small => "public, max-age=3600",
            SizeClass::Large => "no-store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GIB;

    #[test]
    fn test_size_class_threshold_is_exclusive() {
        assert_eq!(SizeClass::of(GIB, GIB), SizeClass::Small);
        assert_eq!(SizeClass::of(GIB + 1, GIB), SizeClass::Large);
        assert_eq!(SizeClass::of(0, GIB), SizeClass::Small);
    }

    #[test]
    fn test_small_file_policy() {
        let config = StreamingConfig::default();
        let policy = ChunkingPolicy::for_file(10 * 1024 * 1024, "video/mp4", &config);

        assert_eq!(policy.size_class, SizeClass::Small);
        assert_eq!(policy.chunk_size, config.small_chunk_size);
        assert_eq!(policy.upstream_timeout, config.small_stream_timeout);
        assert_eq!(policy.max_window_bytes(), None);
        assert_eq!(policy.cache_control(), "public, max-age=3600");
    }

    #[test]
    fn test_large_file_policy() {
        let config = StreamingConfig::default();
        let policy = ChunkingPolicy::for_file(5 * GIB, "video/mp4", &config);

        assert_eq!(policy.size_class, SizeClass::Large);
        assert_eq!(policy.chunk_size, config.large_chunk_size);
        assert_eq!(policy.upstream_timeout, config.large_stream_timeout);
        assert_eq!(
            policy.max_window_bytes(),
            Some(u64::from(config.large_chunk_size) * u64::from(config.max_window_chunks))
        );
        assert_eq!(policy.cache_control(), "no-store");
    }

    #[test]
    fn test_large_matroska_gets_smaller_chunks() {
        let config = StreamingConfig::default();
        let mkv = ChunkingPolicy::for_file(2 * GIB, "video/x-matroska", &config);
        let mp4 = ChunkingPolicy::for_file(2 * GIB, "video/mp4", &config);

        assert_eq!(mkv.chunk_size, config.matroska_chunk_size);
        assert!(mkv.chunk_size < mp4.chunk_size);
        assert!(mkv.max_window_bytes() < mp4.max_window_bytes());
    }

    #[test]
    fn test_zero_settings_are_floored() {
        let config = StreamingConfig {
            small_chunk_size: 0,
            max_window_chunks: 0,
            ..Default::default()
        };
        let policy = ChunkingPolicy::for_file(1, "video/mp4", &config);
        assert_eq!(policy.chunk_size, 1);
        assert_eq!(policy.max_window_chunks, 1);
    }
}
