//! HTTP front of the simulated drive.
//!
//! Serves a Graph-shaped metadata endpoint at `/me/drive/items/{id}` and a
//! range-honoring download endpoint at `/download/{id}`. Point a resolver's
//! `api_base_url` at [`SimulatedDriveServer::base_url`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use drivecast_core::streaming::parse_range_header;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::drive::{FaultPlan, SimulatedDrive};

/// Body frame size used by the download endpoint.
const FRAME_SIZE: usize = 16 * 1024;

/// Errors starting the simulated drive server.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Failed to bind simulated drive to {address}: {reason}")]
    Bind { address: String, reason: String },
}

#[derive(Clone)]
struct SimState {
    drive: Arc<SimulatedDrive>,
    base_url: Arc<str>,
}

/// Builds the simulated drive router.
///
/// `base_url` is the externally visible origin used to build download URLs.
pub fn router(drive: Arc<SimulatedDrive>, base_url: impl Into<String>) -> Router {
    let base_url: String = base_url.into();
    let state = SimState {
        drive,
        base_url: Arc::from(base_url.trim_end_matches('/')),
    };

    Router::new()
        .route("/me/drive/items/{id}", get(item_metadata))
        .route("/download/{id}", get(download))
        .with_state(state)
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn graph_error(status: u16, code: &str) -> Response {
    let body = json!({
        "error": {
            "code": code,
            "message": format!("Simulated drive returned {status}"),
        }
    });
    (status_code(status), Json(body)).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn item_metadata(
    State(state): State<SimState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.drive.record_metadata_request();

    match bearer_token(&headers) {
        Some(token) if state.drive.is_authorized(token) => {}
        _ => return graph_error(401, "InvalidAuthenticationToken"),
    }

    let fault = state.drive.fault(&id);
    if let Some(status) = fault.metadata_status {
        return graph_error(status, "simulatedFault");
    }

    let Some(file) = state.drive.file(&id) else {
        return graph_error(404, "itemNotFound");
    };

    let mut item = json!({
        "id": file.id,
        "name": file.name,
        "size": file.size(),
        "file": { "mimeType": file.mime_type },
    });
    if !fault.omit_download_url {
        item["@microsoft.graph.downloadUrl"] = json!(format!(
            "{}/download/{}?tempauth={}",
            state.base_url,
            file.id,
            Uuid::new_v4().simple()
        ));
    }

    debug!("Served metadata for {}", id);
    Json(item).into_response()
}

/// Window the download endpoint serves for a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadWindow {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interprets a `Range` header the way a strict object store does.
///
/// Unparseable headers are ignored, suffix ranges count from the end, and
/// a start past the end is unsatisfiable.
pub fn download_window(range_header: Option<&str>, size: u64) -> DownloadWindow {
    let Some(spec) = range_header.and_then(|raw| parse_range_header(raw).ok()) else {
        return DownloadWindow::Full;
    };
    if size == 0 {
        return DownloadWindow::Unsatisfiable;
    }

    let (start, end) = match (spec.start, spec.end) {
        (Some(start), end) => (start, end.unwrap_or(size - 1).min(size - 1)),
        (None, Some(suffix)) if suffix > 0 => (size.saturating_sub(suffix), size - 1),
        (None, _) => return DownloadWindow::Full,
    };

    if start >= size || start > end {
        DownloadWindow::Unsatisfiable
    } else {
        DownloadWindow::Partial { start, end }
    }
}

async fn download(
    State(state): State<SimState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.drive.record_download_request();

    let fault = state.drive.fault(&id);
    if let Some(status) = fault.download_status {
        return (status_code(status), Body::empty()).into_response();
    }

    let Some(file) = state.drive.file(&id) else {
        return graph_error(404, "itemNotFound");
    };

    let size = file.size();
    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let window = if fault.ignore_range {
        DownloadWindow::Full
    } else {
        download_window(range_header, size)
    };

    let (status, start, end) = match window {
        DownloadWindow::Full => (StatusCode::OK, 0, size),
        DownloadWindow::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end + 1),
        DownloadWindow::Unsatisfiable => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }
    };

    let data = file.data.slice(start as usize..end as usize);
    let length = data.len() as u64;
    let body = Body::from_stream(body_stream(data, &fault, Arc::clone(&state.drive)));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&file.mime_type) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if status == StatusCode::PARTIAL_CONTENT {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end - 1, size)) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }

    debug!("Serving {} bytes of {} with status {}", length, id, status);
    response
}

/// Splits `data` into frames and applies the drop or stall fault.
fn body_stream(
    data: Bytes,
    fault: &FaultPlan,
    drive: Arc<SimulatedDrive>,
) -> BoxStream<'static, Result<Bytes, io::Error>> {
    let cutoff = fault
        .drop_after
        .or(fault.stall_after)
        .map(|bytes| bytes.min(data.len() as u64) as usize);
    let head = match cutoff {
        Some(cutoff) => data.slice(..cutoff),
        None => data,
    };

    let frames: Vec<Bytes> = (0..head.len())
        .step_by(FRAME_SIZE)
        .map(|offset| head.slice(offset..(offset + FRAME_SIZE).min(head.len())))
        .collect();

    let served = stream::iter(frames).map(move |frame| {
        drive.record_bytes_served(frame.len() as u64);
        Ok::<_, io::Error>(frame)
    });

    let tail: BoxStream<'static, Result<Bytes, io::Error>> = if fault.drop_after.is_some() {
        stream::once(async {
            // Let the delivered frames reach the socket before the reset.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "simulated connection drop",
            ))
        })
        .boxed()
    } else if fault.stall_after.is_some() {
        stream::pending().boxed()
    } else {
        stream::empty().boxed()
    };

    served.chain(tail).boxed()
}

/// Running simulated drive bound to a local port.
///
/// The server task is aborted when the handle is dropped.
pub struct SimulatedDriveServer {
    addr: SocketAddr,
    drive: Arc<SimulatedDrive>,
    task: JoinHandle<()>,
}

impl SimulatedDriveServer {
    /// Binds `addr` (port 0 picks a free port) and starts serving `drive`.
    ///
    /// # Errors
    ///
    /// - `SimError::Bind` - Address unavailable
    pub async fn start(drive: Arc<SimulatedDrive>, addr: SocketAddr) -> Result<Self, SimError> {
        let bind_error = |e: io::Error| SimError::Bind {
            address: addr.to_string(),
            reason: e.to_string(),
        };

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;
        let app = router(Arc::clone(&drive), format!("http://{local}"));

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Simulated drive server stopped: {}", e);
            }
        });

        info!("Simulated drive listening on {}", local);
        Ok(Self {
            addr: local,
            drive,
            task,
        })
    }

    /// Starts on a free loopback port.
    ///
    /// # Errors
    ///
    /// - `SimError::Bind` - No loopback port available
    pub async fn start_local(drive: Arc<SimulatedDrive>) -> Result<Self, SimError> {
        Self::start(drive, SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Origin to use as the resolver's API base URL.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn drive(&self) -> Arc<SimulatedDrive> {
        Arc::clone(&self.drive)
    }
}

impl Drop for SimulatedDriveServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
