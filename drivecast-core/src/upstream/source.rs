//! Opening upstream download URLs for a byte window.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::RANGE;
use thiserror::Error;
use url::Url;

use crate::streaming::range::ByteRange;

/// An opened upstream response: status plus a lazy body.
///
/// Dropping the body stream releases the upstream connection.
pub struct UpstreamBody {
    /// HTTP status returned by the download URL
    pub status: u16,
    /// Body bytes in upstream arrival order
    pub stream: BoxStream<'static, Result<Bytes, io::Error>>,
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamBody")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Errors raised before an upstream response head arrives.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connecting or waiting for the response head timed out.
    #[error("Upstream request timed out")]
    Timeout,

    /// The request could not be sent.
    #[error("Upstream request failed: {reason}")]
    Request { reason: String },
}

/// Provides the raw bytes behind a download URL.
///
/// `window` of `None` requests the whole object; `Some` adds an upstream
/// `Range: bytes=start-end` header. Implementations must not buffer the
/// body: the returned stream yields bytes as they arrive.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Opens the download URL.
    ///
    /// # Errors
    ///
    /// - `SourceError::Timeout` - No response head within the client's limits
    /// - `SourceError::Request` - Connection or protocol failure
    async fn open(
        &self,
        url: &Url,
        window: Option<ByteRange>,
    ) -> Result<UpstreamBody, SourceError>;
}

/// Byte source that issues plain HTTP GETs.
#[derive(Debug, Clone)]
pub struct HttpByteSource {
    client: reqwest::Client,
}

impl HttpByteSource {
    /// Creates a byte source around a shared HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteSource for HttpByteSource {
    async fn open(
        &self,
        url: &Url,
        window: Option<ByteRange>,
    ) -> Result<UpstreamBody, SourceError> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = window {
            request = request.header(RANGE, range.to_range_header());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Request {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let stream = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));

        Ok(UpstreamBody {
            status,
            stream: stream.boxed(),
        })
    }
}
