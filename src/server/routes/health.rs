//! Health check endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub file: String,
    pub connections: usize,
    pub lines: u64,
    pub started_at: String,
}

/// GET /health - Liveness check with subscriber and line counts
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        file: state.file.display().to_string(),
        connections: state.registry.len(),
        lines: state.broadcaster.lines_broadcast(),
        started_at: state.started_at.to_rfc3339(),
    })
}
