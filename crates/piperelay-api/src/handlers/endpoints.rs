//! Endpoint management handlers.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use piperelay_core::{validate_endpoint_url, Application, Endpoint, EndpointId, Store};
use serde::Deserialize;

use crate::{error::ApiError, AppState};

/// Request body for registering an endpoint.
#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    /// Absolute receiver URL (http or https).
    pub url: String,
    /// Optional operator description.
    #[serde(default)]
    pub description: String,
    /// Event-type subscriptions; empty means all.
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Requests-per-second hint, stored but not enforced.
    #[serde(default)]
    pub rate_limit: i32,
    /// Arbitrary key/value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Request body for updating an endpoint. Absent fields keep their
/// current value.
#[derive(Debug, Deserialize)]
pub struct UpdateEndpointRequest {
    /// New receiver URL.
    pub url: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New subscription list.
    pub event_types: Option<Vec<String>>,
    /// New rate-limit hint.
    pub rate_limit: Option<i32>,
    /// New metadata map.
    pub metadata: Option<HashMap<String, String>>,
}

/// POST /api/v1/endpoints
///
/// The signing secret is generated here and returned once in the
/// response body.
pub async fn create(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
    Json(req): Json<CreateEndpointRequest>,
) -> Result<(StatusCode, Json<Endpoint>), ApiError> {
    if req.url.is_empty() {
        return Err(ApiError::BadRequest("url is required".to_string()));
    }
    validate_endpoint_url(&req.url)?;

    let mut endpoint =
        Endpoint::new(app.id, req.url, req.event_types, state.clock.now_utc());
    endpoint.description = req.description;
    endpoint.rate_limit = req.rate_limit;
    endpoint.metadata = sqlx::types::Json(req.metadata);
    state.store.create_endpoint(&endpoint).await?;

    Ok((StatusCode::CREATED, Json(endpoint)))
}

/// GET /api/v1/endpoints
pub async fn list(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
) -> Result<Json<Vec<Endpoint>>, ApiError> {
    Ok(Json(state.store.list_endpoints(&app.id).await?))
}

/// GET /api/v1/endpoints/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Endpoint>, ApiError> {
    let endpoint = state
        .store
        .endpoint(&EndpointId::from(id))
        .await?
        .ok_or_else(|| ApiError::NotFound("endpoint not found".to_string()))?;

    Ok(Json(endpoint))
}

/// PUT /api/v1/endpoints/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEndpointRequest>,
) -> Result<Json<Endpoint>, ApiError> {
    let id = EndpointId::from(id);
    let mut endpoint = state
        .store
        .endpoint(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("endpoint not found".to_string()))?;

    if let Some(url) = req.url {
        validate_endpoint_url(&url)?;
        endpoint.url = url;
    }
    if let Some(description) = req.description {
        endpoint.description = description;
    }
    if let Some(event_types) = req.event_types {
        endpoint.event_types = sqlx::types::Json(event_types);
    }
    if let Some(rate_limit) = req.rate_limit {
        endpoint.rate_limit = rate_limit;
    }
    if let Some(metadata) = req.metadata {
        endpoint.metadata = sqlx::types::Json(metadata);
    }

    state.store.update_endpoint(&endpoint).await?;

    Ok(Json(endpoint))
}

/// DELETE /api/v1/endpoints/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = EndpointId::from(id);
    state
        .store
        .endpoint(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("endpoint not found".to_string()))?;

    state.store.delete_endpoint(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/endpoints/{id}/toggle
pub async fn toggle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Endpoint>, ApiError> {
    let id = EndpointId::from(id);
    let mut endpoint = state
        .store
        .endpoint(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("endpoint not found".to_string()))?;

    endpoint.active = !endpoint.active;
    state.store.set_endpoint_active(&id, endpoint.active).await?;

    Ok(Json(endpoint))
}
