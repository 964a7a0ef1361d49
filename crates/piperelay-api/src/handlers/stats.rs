//! Per-application statistics handler.

use axum::{extract::State, Extension, Json};
use piperelay_core::{AppStats, Application, Store};

use crate::{error::ApiError, AppState};

/// GET /api/v1/stats
pub async fn stats(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
) -> Result<Json<AppStats>, ApiError> {
    Ok(Json(state.store.stats(&app.id).await?))
}
