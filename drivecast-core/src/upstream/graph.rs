//! Resolver for drive APIs shaped like Microsoft Graph.
//!
//! Fetches `{base}/me/drive/items/{id}` with the caller's bearer token and
//! reads `size`, `name`, `file.mimeType`, and the pre-authenticated
//! `@microsoft.graph.downloadUrl` from the response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error, warn};
use url::Url;

use super::{Credential, MediaDescriptor, ResolveError, UpstreamResolver};
use crate::config::{UpstreamConfig, millis};

/// Drive item metadata as returned by the upstream API.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveItem {
    /// File name including extension
    #[serde(default)]
    pub name: Option<String>,
    /// Size in bytes
    #[serde(default)]
    pub size: Option<u64>,
    /// File facet, absent for folders
    #[serde(default)]
    pub file: Option<FileFacet>,
    /// Short-lived pre-authenticated download URL
    #[serde(rename = "@microsoft.graph.downloadUrl", default)]
    pub download_url: Option<String>,
}

/// File facet of a drive item.
#[derive(Debug, Clone, Deserialize)]
pub struct FileFacet {
    /// Content type declared by the upstream store
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

/// Resolver backed by a Graph-style drive API.
#[derive(Debug, Clone)]
pub struct GraphResolver {
    client: reqwest::Client,
    api_base_url: String,
    metadata_timeout: Duration,
}

impl GraphResolver {
    /// Creates a resolver with its own HTTP client.
    ///
    /// # Errors
    ///
    /// - `ResolveError::Upstream` - HTTP client could not be constructed
    pub fn new(config: &UpstreamConfig) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ResolveError::Upstream {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self::with_client(client, config))
    }

    /// Creates a resolver sharing an existing HTTP client.
    pub fn with_client(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            metadata_timeout: config.metadata_timeout,
        }
    }

    fn item_url(&self, file_id: &str) -> String {
        format!(
            "{}/me/drive/items/{}",
            self.api_base_url,
            urlencoding::encode(file_id)
        )
    }

    fn descriptor_from_item(
        file_id: &str,
        item: DriveItem,
    ) -> Result<MediaDescriptor, ResolveError> {
        let raw_url = item
            .download_url
            .ok_or_else(|| ResolveError::MissingDownloadUrl {
                file_id: file_id.to_string(),
            })?;

        let upstream_url =
            Url::parse(&raw_url).map_err(|e| ResolveError::InvalidDownloadUrl {
                file_id: file_id.to_string(),
                reason: e.to_string(),
            })?;

        let declared_content_type = item.file.and_then(|f| f.mime_type).unwrap_or_default();

        Ok(MediaDescriptor::new(
            file_id,
            item.name.unwrap_or_default(),
            item.size.unwrap_or(0),
            declared_content_type,
            upstream_url,
        ))
    }
}

#[async_trait]
impl UpstreamResolver for GraphResolver {
    async fn resolve(
        &self,
        file_id: &str,
        credential: &Credential,
    ) -> Result<MediaDescriptor, ResolveError> {
        let response = self
            .client
            .get(self.item_url(file_id))
            .bearer_auth(credential.token())
            .timeout(self.metadata_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(
                        "Metadata request for {} timed out after {:?}",
                        file_id, self.metadata_timeout
                    );
                    ResolveError::Timeout {
                        timeout_ms: millis(self.metadata_timeout),
                    }
                } else {
                    error!("Metadata request for {} failed: {}", file_id, e);
                    ResolveError::Upstream {
                        reason: format!("HTTP request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Upstream rejected credential for {}", file_id);
            return Err(ResolveError::Unauthorized);
        }
        if status.is_client_error() {
            warn!("Metadata request for {} returned {}", file_id, status);
            return Err(ResolveError::NotFound {
                file_id: file_id.to_string(),
            });
        }
        if !status.is_success() {
            error!("Metadata request for {} returned {}", file_id, status);
            return Err(ResolveError::Upstream {
                reason: format!("Metadata request returned {status}"),
            });
        }

        let item: DriveItem = response.json().await.map_err(|e| {
            if e.is_timeout() {
                warn!("Metadata body for {} timed out", file_id);
                ResolveError::Timeout {
                    timeout_ms: millis(self.metadata_timeout),
                }
            } else {
                ResolveError::Upstream {
                    reason: format!("JSON parsing failed: {e}"),
                }
            }
        })?;

        let descriptor = Self::descriptor_from_item(file_id, item)?;
        debug!(
            "Resolved {} ({} bytes, {}) via {}",
            descriptor.id,
            descriptor.total_size,
            descriptor.classified_content_type,
            descriptor.upstream_host()
        );

        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_item(json: &str) -> DriveItem {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_descriptor_from_graph_item() {
        let item = parse_item(
            r#"{
                "id": "01ABC",
                "name": "Episode 01.mkv",
                "size": 734003200,
                "file": { "mimeType": "application/octet-stream" },
                "@microsoft.graph.downloadUrl": "https://public.dm.files.example.com/y4m/abc?download=1"
            }"#,
        );

        let descriptor = GraphResolver::descriptor_from_item("01ABC", item).unwrap();
        assert_eq!(descriptor.id, "01ABC");
        assert_eq!(descriptor.total_size, 734_003_200);
        assert_eq!(descriptor.declared_content_type, "application/octet-stream");
        assert_eq!(descriptor.classified_content_type, "video/x-matroska");
    }

    #[test]
    fn test_missing_download_url_is_not_found_class() {
        let item = parse_item(r#"{ "name": "folder", "size": 0 }"#);
        let err = GraphResolver::descriptor_from_item("f1", item).unwrap_err();
        assert!(matches!(err, ResolveError::MissingDownloadUrl { .. }));
    }

    #[test]
    fn test_invalid_download_url() {
        let item = parse_item(r#"{ "name": "a.mp4", "@microsoft.graph.downloadUrl": "not a url" }"#);
        let err = GraphResolver::descriptor_from_item("f2", item).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidDownloadUrl { .. }));
    }

    #[test]
    fn test_item_url_encodes_id() {
        let config = UpstreamConfig {
            api_base_url: "http://127.0.0.1:8080/v1.0/".to_string(),
            ..Default::default()
        };
        let resolver = GraphResolver::new(&config).unwrap();
        assert_eq!(
            resolver.item_url("a b/c"),
            "http://127.0.0.1:8080/v1.0/me/drive/items/a%20b%2Fc"
        );
    }
}
