//! Stream endpoint: `GET /stream/{id}` and `GET /api/stream/{id}`.
//!
//! `HEAD` on the same paths answers with the stream's headers and never
//! contacts the download URL.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::http::header;
use axum::response::Response;
use drivecast_core::{Credential, StreamRequest};
use serde::Deserialize;

use crate::error::ProxyError;
use crate::server::AppState;

/// Query parameters for stream requests
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Bearer token for players that cannot set headers
    pub token: Option<String>,
    /// Preferred quality; advisory only
    pub quality: Option<String>,
}

/// Picks the credential: `Authorization` header first, then `?token=`.
pub fn extract_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<Credential> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credential::from_authorization)
        .or_else(|| query_token.and_then(Credential::bearer))
}

/// Streams a drive file, honoring `Range`.
pub async fn stream_file(
    State(state): State<AppState>,
    method: Method,
    Path(file_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let credential = extract_credential(&headers, query.token.as_deref());
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = StreamRequest {
        file_id,
        credential,
        range_header,
        quality: query.quality,
        headers_only: method == Method::HEAD,
    };

    Ok(state.proxy.serve(request).await?)
}
