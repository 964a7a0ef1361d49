//! Delivery and attempt inspection handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use piperelay_core::{Attempt, Delivery, DeliveryId, Store};

use crate::{error::ApiError, AppState};

/// GET /api/v1/deliveries/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Delivery>, ApiError> {
    let delivery = state
        .store
        .delivery(&DeliveryId::from(id))
        .await?
        .ok_or_else(|| ApiError::NotFound("delivery not found".to_string()))?;

    Ok(Json(delivery))
}

/// GET /api/v1/deliveries/{id}/attempts
pub async fn attempts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Attempt>>, ApiError> {
    let id = DeliveryId::from(id);
    state
        .store
        .delivery(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("delivery not found".to_string()))?;

    Ok(Json(state.store.attempts_for_delivery(&id).await?))
}
