//! Mapping of proxy failures onto HTTP responses.

use axum::Json;
use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use drivecast_core::{DrivecastError, RelayError, ResolveError};
use serde_json::json;
use tracing::{error, warn};

/// Error returned by stream handlers.
///
/// Bodies carry only the generic user message; details go to the log.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ProxyError(#[from] pub DrivecastError);

impl From<ResolveError> for ProxyError {
    fn from(e: ResolveError) -> Self {
        Self(e.into())
    }
}

impl ProxyError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DrivecastError::Resolve(e) => match e {
                ResolveError::Unauthorized => StatusCode::UNAUTHORIZED,
                ResolveError::NotFound { .. } | ResolveError::MissingDownloadUrl { .. } => {
                    StatusCode::NOT_FOUND
                }
                ResolveError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                ResolveError::InvalidDownloadUrl { .. } | ResolveError::Upstream { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            DrivecastError::Relay(e) => match e {
                RelayError::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
                RelayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                RelayError::Open(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            DrivecastError::Configuration { .. } | DrivecastError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();

        if self.0.is_client_error() {
            warn!("Stream request rejected with {}: {}", status, self.0);
        } else {
            error!("Stream request failed with {}: {}", status, self.0);
        }

        // The download URL already refused; there is nothing to describe.
        if matches!(self.0, DrivecastError::Relay(RelayError::UpstreamStatus { .. })) {
            return (status, Body::empty()).into_response();
        }

        let mut response = (status, Json(json!({ "error": self.0.user_message() }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: impl Into<DrivecastError>) -> StatusCode {
        ProxyError(err.into()).status()
    }

    #[test]
    fn test_status_taxonomy() {
        assert_eq!(status_of(ResolveError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(ResolveError::NotFound {
                file_id: "x".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ResolveError::MissingDownloadUrl {
                file_id: "x".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ResolveError::Timeout { timeout_ms: 10 }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(ResolveError::Upstream {
                reason: "503".to_string()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(RelayError::UpstreamStatus { status: 403 }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_error_body_hides_details() {
        let response = ProxyError::from(ResolveError::Upstream {
            reason: "10.1.2.3 refused connection".to_string(),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Upstream storage error");
    }

    #[tokio::test]
    async fn test_unauthorized_challenges_bearer() {
        let response = ProxyError::from(ResolveError::Unauthorized).into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn test_bad_gateway_has_empty_body() {
        let response =
            ProxyError(DrivecastError::from(RelayError::UpstreamStatus { status: 410 })).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }
}
