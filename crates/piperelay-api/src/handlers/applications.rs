//! Application management handlers (admin surface, unauthenticated).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use piperelay_core::{new_api_key, Application, ApplicationId, Store};
use serde::Deserialize;

use crate::{error::ApiError, AppState};

/// Request body for creating an application.
#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    /// Display name for the new application.
    pub name: String,
}

/// POST /api/v1/applications
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<Application>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let app = Application::new(req.name, state.clock.now_utc());
    state.store.create_application(&app).await?;

    Ok((StatusCode::CREATED, Json(app)))
}

/// GET /api/v1/applications
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<Application>>, ApiError> {
    Ok(Json(state.store.list_applications().await?))
}

/// GET /api/v1/applications/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Application>, ApiError> {
    let app = state
        .store
        .application(&ApplicationId::from(id))
        .await?
        .ok_or_else(|| ApiError::NotFound("application not found".to_string()))?;

    Ok(Json(app))
}

/// DELETE /api/v1/applications/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = ApplicationId::from(id);
    state
        .store
        .application(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("application not found".to_string()))?;

    state.store.delete_application(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/applications/{id}/rotate-key
///
/// Invalidates the previous token immediately; the response carries the
/// only copy of the new one.
pub async fn rotate_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Application>, ApiError> {
    let id = ApplicationId::from(id);
    let mut app = state
        .store
        .application(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("application not found".to_string()))?;

    let api_key = new_api_key();
    state.store.rotate_api_key(&id, &api_key).await?;
    app.api_key = api_key;

    Ok(Json(app))
}
