//! Health check endpoints

use axum::{Json, Router, routing::get};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Liveness check
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build health router (no state needed)
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
}
