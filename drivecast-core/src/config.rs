//! Centralized configuration for Drivecast.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

/// Size of one gibibyte in bytes.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Central configuration for all Drivecast components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct DrivecastConfig {
    pub upstream: UpstreamConfig,
    pub streaming: StreamingConfig,
    pub server: ServerConfig,
}

/// Upstream object-store API configuration.
///
/// Controls where metadata is fetched from and how long the metadata
/// call may take before it is reported as a timeout.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the drive API (items are fetched from `{base}/me/drive/items/{id}`)
    pub api_base_url: String,
    /// Timeout for the metadata fetch
    pub metadata_timeout: Duration,
    /// TCP connect timeout for every upstream request
    pub connect_timeout: Duration,
    /// User agent for upstream HTTP requests
    pub user_agent: &'static str,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            metadata_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            user_agent: "drivecast/0.1.0",
        }
    }
}

/// What the range negotiator does with a start offset past the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfRangePolicy {
    /// Restart from byte zero so playback continues.
    Clamp,
    /// Answer `416 Range Not Satisfiable`.
    Reject,
}

/// Streaming relay configuration.
///
/// Controls the size-class threshold, chunk sizes per class, the bounded
/// window served for large files, and per-read upstream timeouts.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Files strictly larger than this are in the large size class
    pub large_file_threshold: u64,
    /// Chunk size for small files
    pub small_chunk_size: u32,
    /// Chunk size for large files
    pub large_chunk_size: u32,
    /// Chunk size for large Matroska files
    pub matroska_chunk_size: u32,
    /// Maximum number of chunks a single large-file range may span
    pub max_window_chunks: u32,
    /// Upstream idle timeout while streaming a small file
    pub small_stream_timeout: Duration,
    /// Upstream idle timeout while streaming a large file
    pub large_stream_timeout: Duration,
    /// Handling of range starts beyond the end of the file
    pub out_of_range: OutOfRangePolicy,
    /// Attach per-format compatibility headers (Matroska hints)
    pub compatibility_headers: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            large_file_threshold: GIB,
            small_chunk_size: 64 * 1024,     // 64 KiB
            large_chunk_size: 1024 * 1024,   // 1 MiB
            matroska_chunk_size: 256 * 1024, // 256 KiB
            max_window_chunks: 64,
            small_stream_timeout: Duration::from_secs(60),
            large_stream_timeout: Duration::from_secs(300), // 5 minutes
            out_of_range: OutOfRangePolicy::Clamp,
            compatibility_headers: true,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl StreamingConfig {
    /// Creates a configuration for fast deterministic tests.
    ///
    /// Uses a tiny large-file threshold and short timeouts so the large
    /// size class and abort paths can be exercised with small payloads.
    pub fn deterministic_testing() -> Self {
        Self {
            large_file_threshold: 64 * 1024,
            small_chunk_size: 1024,
            large_chunk_size: 4096,
            matroska_chunk_size: 2048,
            max_window_chunks: 4,
            small_stream_timeout: Duration::from_millis(500),
            large_stream_timeout: Duration::from_secs(2),
            out_of_range: OutOfRangePolicy::Clamp,
            compatibility_headers: true,
        }
    }
}

impl DrivecastConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("DRIVECAST_API_BASE_URL") {
            config.upstream.api_base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("DRIVECAST_METADATA_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.upstream.metadata_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(threshold) = std::env::var("DRIVECAST_LARGE_FILE_THRESHOLD") {
            if let Ok(bytes) = threshold.parse::<u64>() {
                config.streaming.large_file_threshold = bytes;
            }
        }

        if let Ok(chunks) = std::env::var("DRIVECAST_MAX_WINDOW_CHUNKS") {
            if let Ok(count) = chunks.parse::<u32>() {
                config.streaming.max_window_chunks = count.max(1);
            }
        }

        if let Ok(timeout) = std::env::var("DRIVECAST_LARGE_STREAM_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.streaming.large_stream_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(policy) = std::env::var("DRIVECAST_OUT_OF_RANGE") {
            config.streaming.out_of_range = match policy.to_ascii_lowercase().as_str() {
                "reject" => OutOfRangePolicy::Reject,
                _ => OutOfRangePolicy::Clamp,
            };
        }

        if let Ok(enabled) = std::env::var("DRIVECAST_COMPATIBILITY_HEADERS") {
            config.streaming.compatibility_headers =
                !matches!(enabled.to_ascii_lowercase().as_str(), "0" | "false" | "off");
        }

        if let Ok(host) = std::env::var("DRIVECAST_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("DRIVECAST_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.server.port = port;
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            streaming: StreamingConfig::deterministic_testing(),
            upstream: UpstreamConfig {
                metadata_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_default_config_values() {
        let config = DrivecastConfig::default();

        assert_eq!(config.streaming.large_file_threshold, GIB);
        assert_eq!(config.streaming.small_chunk_size, 65536);
        assert_eq!(config.streaming.large_chunk_size, 1_048_576);
        assert!(config.streaming.matroska_chunk_size < config.streaming.large_chunk_size);
        assert_eq!(config.streaming.out_of_range, OutOfRangePolicy::Clamp);
        assert!(config.streaming.compatibility_headers);
        assert_eq!(config.upstream.metadata_timeout, Duration::from_secs(15));
        assert!(config.streaming.large_stream_timeout > config.streaming.small_stream_timeout);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_testing_preset_keeps_class_ordering() {
        let config = DrivecastConfig::for_testing();

        assert!(config.streaming.small_chunk_size < config.streaming.large_chunk_size);
        assert!(
            u64::from(config.streaming.large_chunk_size) < config.streaming.large_file_threshold
        );
        assert!(config.streaming.small_stream_timeout < Duration::from_secs(1));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("DRIVECAST_API_BASE_URL", "http://127.0.0.1:9999/v1.0");
            std::env::set_var("DRIVECAST_METADATA_TIMEOUT", "3");
            std::env::set_var("DRIVECAST_MAX_WINDOW_CHUNKS", "0");
            std::env::set_var("DRIVECAST_OUT_OF_RANGE", "Reject");
            std::env::set_var("DRIVECAST_PORT", "8088");
            std::env::set_var("DRIVECAST_COMPATIBILITY_HEADERS", "off");
        }

        let config = DrivecastConfig::from_env();

        assert_eq!(config.upstream.api_base_url, "http://127.0.0.1:9999/v1.0");
        assert_eq!(config.upstream.metadata_timeout, Duration::from_secs(3));
        assert_eq!(config.streaming.max_window_chunks, 1);
        assert_eq!(config.streaming.out_of_range, OutOfRangePolicy::Reject);
        assert_eq!(config.server.port, 8088);
        assert!(!config.streaming.compatibility_headers);

        // Cleanup
        unsafe {
            std::env::remove_var("DRIVECAST_API_BASE_URL");
            std::env::remove_var("DRIVECAST_METADATA_TIMEOUT");
            std::env::remove_var("DRIVECAST_MAX_WINDOW_CHUNKS");
            std::env::remove_var("DRIVECAST_OUT_OF_RANGE");
            std::env::remove_var("DRIVECAST_PORT");
            std::env::remove_var("DRIVECAST_COMPATIBILITY_HEADERS");
        }
    }
}
