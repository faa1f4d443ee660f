//! Health check endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Distinct agents with a registered connection.
    pub agents_online: usize,
}

/// Simple health check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let realtime = state.realtime();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: realtime.rooms().connection_count(),
        agents_online: realtime.registry().connected_agents(),
    })
}

/// Create health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
