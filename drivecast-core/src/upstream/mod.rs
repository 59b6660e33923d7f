//! Upstream object-store access.
//!
//! The resolver turns an opaque file id plus the caller's bearer credential
//! into a [`MediaDescriptor`]: size, names, content types, and the
//! short-lived direct download URL. The byte source opens that URL for a
//! byte window and hands back a lazy body stream.

pub mod graph;
pub mod source;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use graph::GraphResolver;
pub use source::{ByteSource, HttpByteSource, SourceError, UpstreamBody};

use crate::streaming::media_type::{MediaKind, classify};

/// Bearer credential supplied by the downstream client.
///
/// Never printed: the `Debug` impl is redacted so credentials cannot leak
/// into logs through `{:?}`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw bearer token. Returns `None` for blank tokens.
    pub fn bearer(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Parses an `Authorization` header value.
    ///
    /// Accepts `Bearer <token>` (scheme matched case-insensitively) and a
    /// bare token, which is what browser players tend to forward.
    pub fn from_authorization(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => Self::bearer(token),
            Some(_) => None,
            None => Self::bearer(value),
        }
    }

    /// Returns the raw token for use in an upstream `Authorization` header.
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Request-scoped description of one remote file.
///
/// Created once per request by a resolver and immutable afterwards. The
/// download URL is time-limited by the upstream provider and must not be
/// kept beyond the request that resolved it.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub id: String,
    pub declared_name: String,
    pub total_size: u64,
    pub declared_content_type: String,
    pub upstream_url: Url,
    pub classified_content_type: String,
    pub media_kind: MediaKind,
}

impl MediaDescriptor {
    /// Builds a descriptor, classifying the content type from the name and
    /// declared type.
    pub fn new(
        id: impl Into<String>,
        declared_name: impl Into<String>,
        total_size: u64,
        declared_content_type: impl Into<String>,
        upstream_url: Url,
    ) -> Self {
        let declared_name = declared_name.into();
        let declared_content_type = declared_content_type.into();
        let classified_content_type = classify(&declared_name, &declared_content_type);
        let media_kind = MediaKind::detect(&declared_name, &classified_content_type);

        Self {
            id: id.into(),
            declared_name,
            total_size,
            declared_content_type,
            upstream_url,
            classified_content_type,
            media_kind,
        }
    }

    /// Host of the download URL, for logging without leaking its signature.
    pub fn upstream_host(&self) -> &str {
        self.upstream_url.host_str().unwrap_or("unknown")
    }
}

/// Errors raised while resolving a file id into a descriptor.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Credential missing, blank, or rejected by the upstream.
    #[error("Credential missing or rejected by upstream")]
    Unauthorized,

    /// Upstream reported the object missing or inaccessible.
    #[error("File not found: {file_id}")]
    NotFound { file_id: String },

    /// Metadata carried no direct download URL.
    #[error("No download URL available for file {file_id}")]
    MissingDownloadUrl { file_id: String },

    /// Metadata carried a download URL that does not parse.
    #[error("Invalid download URL for file {file_id}: {reason}")]
    InvalidDownloadUrl { file_id: String, reason: String },

    /// Metadata fetch exceeded its timeout.
    #[error("Metadata request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Network failure, upstream 5xx, or undecodable metadata.
    #[error("Upstream error: {reason}")]
    Upstream { reason: String },
}

/// Resolves remote files into descriptors.
///
/// Implementations perform exactly one metadata fetch per call and keep no
/// state between calls, so one instance serves any number of concurrent
/// requests.
#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    /// Fetches metadata and the download URL for `file_id`.
    ///
    /// # Errors
    ///
    /// - `ResolveError::Unauthorized` - Credential rejected
    /// - `ResolveError::NotFound` - Upstream 4xx on the metadata call
    /// - `ResolveError::MissingDownloadUrl` - Metadata has no download URL
    /// - `ResolveError::Timeout` - Metadata call timed out
    /// - `ResolveError::Upstream` - Upstream 5xx or network failure
    async fn resolve(
        &self,
        file_id: &str,
        credential: &Credential,
    ) -> Result<MediaDescriptor, ResolveError>;
}
