//! Health check handler.

use axum::{extract::State, http::StatusCode, Json};
use piperelay_core::Store;
use serde::Serialize;
use tracing::error;

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when the store is reachable, `degraded` otherwise.
    pub status: &'static str,
}

/// GET /health — verifies store connectivity. No authentication.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ok" })),
        Err(e) => {
            error!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { status: "degraded" }))
        },
    }
}
