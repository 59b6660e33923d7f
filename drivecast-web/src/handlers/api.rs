//! Health and stats endpoints.

use axum::extract::State;
use axum::response::Json;
use drivecast_core::RelayMetricsSnapshot;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub service: &'static str,
    pub mode: String,
    pub timestamp: String,
    pub uptime_secs: u64,
}

pub async fn api_health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        service: "drivecast",
        mode: state.mode.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn api_stats(State(state): State<AppState>) -> Json<RelayMetricsSnapshot> {
    Json(state.proxy.metrics().snapshot())
}
