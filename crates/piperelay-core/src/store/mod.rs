//! Storage contract and backends.
//!
//! The delivery pipeline and the REST surface consume one abstract
//! [`Store`] trait. Two backends implement it: [`sqlite::SqliteStore`]
//! (durable, the default deployment target) and [`memory::MemoryStore`]
//! (non-durable, used by tests and ephemeral setups). Both enforce the
//! same semantics: cascade deletes, due-queue ordering by creation time,
//! and row leasing for single-flight dispatch.

use async_trait::async_trait;
use serde::Serialize;

pub mod memory;
pub mod sqlite;

use crate::{
    error::Result,
    models::{
        Application, ApplicationId, Attempt, Delivery, DeliveryId, Endpoint, EndpointId, Message,
        MessageId,
    },
};

/// How long a row returned by `due_deliveries` stays invisible to
/// subsequent polls. Must exceed the send timeout so an in-flight
/// attempt cannot be double-dispatched; an expired lease simply makes
/// the row eligible again (at-least-once).
pub const DELIVERY_LEASE_SECS: i64 = 60;

/// Per-application delivery statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppStats {
    /// Total messages ingested.
    pub total_messages: i64,
    /// Total deliveries materialized by fan-out.
    pub total_deliveries: i64,
    /// Deliveries in terminal success.
    pub success_count: i64,
    /// Deliveries in terminal failure.
    pub failed_count: i64,
    /// Deliveries still owned by the worker pool.
    pub pending_count: i64,
    /// success_count / total_deliveries as a percentage.
    pub success_rate: f64,
    /// Endpoints registered for the application.
    pub total_endpoints: i64,
    /// Endpoints currently active.
    pub active_endpoints: i64,
}

/// Durable persistence contract consumed by the delivery pipeline and
/// the REST surface.
///
/// Lookups return `Ok(None)` on miss; `Err` is reserved for backend
/// failures, which callers treat as transient.
#[async_trait]
pub trait Store: Send + Sync {
    // Applications

    /// Persists a new application.
    async fn create_application(&self, app: &Application) -> Result<()>;

    /// Looks up an application by ID.
    async fn application(&self, id: &ApplicationId) -> Result<Option<Application>>;

    /// Looks up an application by its bearer token. Used by auth.
    async fn application_by_api_key(&self, api_key: &str) -> Result<Option<Application>>;

    /// All applications, newest first.
    async fn list_applications(&self) -> Result<Vec<Application>>;

    /// Deletes an application, cascading to its endpoints, messages,
    /// deliveries, and attempts.
    async fn delete_application(&self, id: &ApplicationId) -> Result<()>;

    /// Replaces an application's bearer token.
    async fn rotate_api_key(&self, id: &ApplicationId, api_key: &str) -> Result<()>;

    // Endpoints

    /// Persists a new endpoint.
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Looks up an endpoint by ID.
    async fn endpoint(&self, id: &EndpointId) -> Result<Option<Endpoint>>;

    /// All endpoints of one application, newest first.
    async fn list_endpoints(&self, app_id: &ApplicationId) -> Result<Vec<Endpoint>>;

    /// Updates endpoint configuration (url, description, subscriptions,
    /// rate limit hint, metadata, active flag).
    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Deletes an endpoint, cascading to its deliveries and attempts.
    async fn delete_endpoint(&self, id: &EndpointId) -> Result<()>;

    /// Flips the active flag.
    async fn set_endpoint_active(&self, id: &EndpointId, active: bool) -> Result<()>;

    /// Every active endpoint of `app_id` whose subscription list matches
    /// `event_type`. Fan-out reads this as a one-shot snapshot.
    async fn active_endpoints_for_event(
        &self,
        app_id: &ApplicationId,
        event_type: &str,
    ) -> Result<Vec<Endpoint>>;

    // Messages

    /// Persists a new message. Messages are immutable afterwards.
    async fn create_message(&self, message: &Message) -> Result<()>;

    /// Looks up a message by ID.
    async fn message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Messages of one application, newest first, paginated.
    async fn list_messages(
        &self,
        app_id: &ApplicationId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>>;

    // Deliveries

    /// Persists a new delivery row.
    async fn create_delivery(&self, delivery: &Delivery) -> Result<()>;

    /// Looks up a delivery by ID.
    async fn delivery(&self, id: &DeliveryId) -> Result<Option<Delivery>>;

    /// All deliveries materialized for one message, oldest first.
    async fn deliveries_for_message(&self, message_id: &MessageId) -> Result<Vec<Delivery>>;

    /// Atomically updates {status, attempt_count, next_retry_at,
    /// updated_at} and releases the dispatch lease.
    async fn update_delivery(&self, delivery: &Delivery) -> Result<()>;

    /// At most `limit` deliveries that are due: status pending or
    /// retrying, next_retry_at null or in the past, not currently
    /// leased. Returned rows are leased for [`DELIVERY_LEASE_SECS`] and
    /// ordered oldest first.
    async fn due_deliveries(&self, limit: i64) -> Result<Vec<Delivery>>;

    /// Removes a delivery row. Used when its parents were cascade-removed
    /// under a racing read.
    async fn delete_delivery(&self, id: &DeliveryId) -> Result<()>;

    /// Manual retry: flips every failed delivery of the message back to
    /// retrying with next_retry_at = now. Attempt history and counts are
    /// preserved. Returns the number of rows flipped.
    async fn retry_failed_for_message(&self, message_id: &MessageId) -> Result<u64>;

    // Attempts

    /// Appends an attempt record. Attempts are never modified.
    async fn create_attempt(&self, attempt: &Attempt) -> Result<()>;

    /// All attempts of one delivery, by attempt number ascending.
    async fn attempts_for_delivery(&self, delivery_id: &DeliveryId) -> Result<Vec<Attempt>>;

    // Stats

    /// Aggregated counters for one application.
    async fn stats(&self, app_id: &ApplicationId) -> Result<AppStats>;

    // Lifecycle

    /// Verifies the backend is reachable.
    async fn health_check(&self) -> Result<()>;

    /// Releases backend resources. Further calls may fail.
    async fn close(&self);
}
