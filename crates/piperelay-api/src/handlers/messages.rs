//! Message ingest and inspection handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use piperelay_core::{ingest_message, Application, Delivery, Message, MessageId, Store};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{error::ApiError, AppState};

/// Request body for sending a message.
///
/// The payload is kept as raw JSON text so the delivered bytes are
/// exactly what the producer submitted.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Dotted event-type string, e.g. `order.created`.
    pub event_type: String,
    /// Opaque JSON payload.
    pub payload: Box<RawValue>,
}

/// Message as served over the API, with the payload re-exposed as JSON.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Message identifier.
    pub id: MessageId,
    /// Owning application.
    pub app_id: piperelay_core::ApplicationId,
    /// Event type.
    pub event_type: String,
    /// The ingested payload.
    pub payload: serde_json::Value,
    /// Ingest timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        let payload = serde_json::from_slice(&message.payload).unwrap_or(serde_json::Value::Null);
        Self {
            id: message.id,
            app_id: message.app_id,
            event_type: message.event_type,
            payload,
            created_at: message.created_at,
        }
    }
}

/// Response for a successful ingest.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    /// The persisted message.
    pub message: MessageResponse,
    /// Number of deliveries created by fan-out.
    pub deliveries: usize,
}

/// Pagination parameters for listing messages.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Page size, defaults to 50.
    pub limit: Option<i64>,
    /// Rows to skip, defaults to 0.
    pub offset: Option<i64>,
}

/// POST /api/v1/messages
///
/// Synchronous with respect to persistence and fan-out; delivery itself
/// happens asynchronously, hence 202.
pub async fn send(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let payload = req.payload.get().as_bytes().to_vec();

    let receipt =
        ingest_message(&*state.store, &*state.clock, &app.id, &req.event_type, payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SendMessageResponse {
            message: receipt.message.into(),
            deliveries: receipt.deliveries_created,
        }),
    ))
}

/// GET /api/v1/messages
pub async fn list(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(50);
    let offset = query.offset.filter(|o| *o >= 0).unwrap_or(0);

    let messages = state.store.list_messages(&app.id, limit, offset).await?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// Message detail with its deliveries.
#[derive(Debug, Serialize)]
pub struct MessageDetailResponse {
    /// The message.
    pub message: MessageResponse,
    /// Every delivery fan-out created for it.
    pub deliveries: Vec<Delivery>,
}

/// GET /api/v1/messages/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageDetailResponse>, ApiError> {
    let id = MessageId::from(id);
    let message = state
        .store
        .message(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("message not found".to_string()))?;

    let deliveries = state.store.deliveries_for_message(&id).await?;

    Ok(Json(MessageDetailResponse { message: message.into(), deliveries }))
}

/// Response for a manual retry.
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    /// Number of failed deliveries flipped back to retrying.
    pub retried: u64,
}

/// POST /api/v1/messages/{id}/retry
///
/// Flips every failed delivery of the message back to retrying with an
/// immediate due time. Attempt history is preserved.
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let id = MessageId::from(id);
    state
        .store
        .message(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("message not found".to_string()))?;

    let retried = state.store.retry_failed_for_message(&id).await?;

    Ok(Json(RetryResponse { retried }))
}
