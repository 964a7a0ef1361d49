//! Message ingest and delivery fan-out.
//!
//! Persists an incoming event and materializes one pending delivery per
//! matching active endpoint. Fan-out is a one-shot snapshot at ingest
//! time; endpoints registered afterwards do not receive the message. No
//! delivery is attempted inline — the worker pool picks the rows up on
//! its next poll.

use tracing::info;

use crate::{
    error::{CoreError, Result},
    models::{ApplicationId, Delivery, Message, MessageId, MAX_PAYLOAD_BYTES},
    store::Store,
    time::Clock,
};

/// Outcome of a successful ingest.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    /// The persisted message.
    pub message: Message,
    /// Number of deliveries materialized by fan-out.
    pub deliveries_created: usize,
}

/// Ingests one event for an application.
///
/// # Errors
///
/// Returns `InvalidInput` for an empty event type or payload,
/// `PayloadTooLarge` above 256 KiB, and storage errors verbatim. A
/// storage failure mid-fan-out aborts the ingest; already-written rows
/// stay behind and are delivered (at-least-once, never silent loss).
pub async fn ingest_message(
    store: &dyn Store,
    clock: &dyn Clock,
    app_id: &ApplicationId,
    event_type: &str,
    payload: Vec<u8>,
) -> Result<IngestReceipt> {
    if event_type.is_empty() {
        return Err(CoreError::InvalidInput("event_type is required".into()));
    }
    if payload.is_empty() {
        return Err(CoreError::InvalidInput("payload is required".into()));
    }
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CoreError::PayloadTooLarge {
            size_bytes: payload.len(),
            limit_bytes: MAX_PAYLOAD_BYTES,
        });
    }

    let now = clock.now_utc();
    let message = Message {
        id: MessageId::new(),
        app_id: app_id.clone(),
        event_type: event_type.to_string(),
        payload,
        created_at: now,
    };
    store.create_message(&message).await?;

    let endpoints = store.active_endpoints_for_event(app_id, event_type).await?;

    let mut deliveries_created = 0;
    for endpoint in &endpoints {
        let delivery = Delivery::new(message.id.clone(), endpoint.id.clone(), now);
        store.create_delivery(&delivery).await?;
        deliveries_created += 1;
    }

    info!(
        message_id = %message.id,
        event_type = %message.event_type,
        deliveries = deliveries_created,
        "message ingested"
    );

    Ok(IngestReceipt { message, deliveries_created })
}
