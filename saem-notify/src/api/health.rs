//! Health check endpoint
//!
//! Reports liveness plus the messaging session state, so an operator can read
//! the pending pairing code without shell access.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::messaging::ConnectionStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub messaging: ConnectionStatus,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "saem-notify".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        messaging: state.engine.connection_status(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
