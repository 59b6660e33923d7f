//! Drivecast Core - range-aware streaming proxy for cloud drive media
//!
//! Resolves remote drive files into descriptors, classifies their content
//! type, negotiates HTTP `Range` requests, and relays upstream bytes with
//! bounded memory and per-read timeouts.

pub mod config;
pub mod mode;
pub mod proxy;
pub mod streaming;
pub mod upstream;

pub use config::{DrivecastConfig, OutOfRangePolicy, ServerConfig, StreamingConfig, UpstreamConfig};
pub use mode::RuntimeMode;
pub use proxy::{MediaProxy, StreamRequest};
pub use streaming::{RelayError, RelayMetrics, RelayMetricsSnapshot};
pub use upstream::{Credential, MediaDescriptor, ResolveError, UpstreamResolver};

/// Errors that can end a stream request before its response head is sent.
#[derive(Debug, thiserror::Error)]
pub enum DrivecastError {
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DrivecastError {
    /// Returns a generic message safe to show to clients.
    ///
    /// Never includes upstream URLs, credentials, or upstream error text.
    pub fn user_message(&self) -> String {
        match self {
            DrivecastError::Resolve(e) => match e {
                ResolveError::Unauthorized => "Missing or invalid access token".to_string(),
                ResolveError::NotFound { .. } | ResolveError::MissingDownloadUrl { .. } => {
                    "File not found".to_string()
                }
                ResolveError::Timeout { .. } => "Upstream storage timed out".to_string(),
                _ => "Upstream storage error".to_string(),
            },
            DrivecastError::Relay(e) => match e {
                RelayError::UpstreamTimeout { .. } => "Upstream download timed out".to_string(),
                _ => "Upstream download failed".to_string(),
            },
            DrivecastError::Configuration { .. } => "Configuration error occurred".to_string(),
            DrivecastError::Io(_) => "I/O error occurred".to_string(),
        }
    }

    /// Checks if this error is caused by the client's request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DrivecastError::Resolve(
                ResolveError::Unauthorized
                    | ResolveError::NotFound { .. }
                    | ResolveError::MissingDownloadUrl { .. }
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, DrivecastError>;
