//! Core domain models and strongly-typed identifiers.
//!
//! Defines applications, endpoints, messages, deliveries, and attempts
//! together with newtype ID wrappers. Identifiers are time-sortable
//! `<prefix>_<ULID>` strings so that creation order equals identifier
//! order within a millisecond.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::CoreError;

type Db = sqlx::Sqlite;
type SqliteArgs<'q> = <Db as sqlx::Database>::ArgumentBuffer<'q>;
type SqliteValueRef<'r> = sqlx::sqlite::SqliteValueRef<'r>;
type SqliteTypeInfo = sqlx::sqlite::SqliteTypeInfo;
type BoxDynError = sqlx::error::BoxDynError;
type EncodeResult = Result<sqlx::encode::IsNull, BoxDynError>;

/// Maximum accepted message payload in bytes (256 KiB).
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Maximum stored response-body prefix per attempt in bytes.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1024;

fn new_prefixed_id(prefix: &str) -> String {
    format!("{prefix}_{}", Ulid::new())
}

fn random_alphanumeric(len: usize) -> String {
    rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

/// Generates a fresh application API key (`pk_` + 32 alphanumerics).
pub fn new_api_key() -> String {
    format!("pk_{}", random_alphanumeric(32))
}

/// Generates a fresh endpoint signing secret (`whsec_` + 40 alphanumerics).
pub fn new_endpoint_secret() -> String {
    format!("whsec_{}", random_alphanumeric(40))
}

/// Validates a receiver URL at registration time.
///
/// Only absolute `http` and `https` URLs with a non-empty host are
/// accepted.
///
/// # Errors
///
/// Returns `CoreError::InvalidInput` describing the rejected URL.
pub fn validate_endpoint_url(url: &str) -> Result<(), CoreError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| CoreError::InvalidInput("url must use the http or https scheme".into()))?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(CoreError::InvalidInput("url host must not be empty".into()));
    }

    Ok(())
}

/// Strongly-typed application identifier (`app_<ULID>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    /// Creates a new time-sortable application ID.
    pub fn new() -> Self {
        Self(new_prefixed_id("app"))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ApplicationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<Db> for ApplicationId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for ApplicationId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        Ok(Self(<String as sqlx::Decode<Db>>::decode(value)?))
    }
}

impl<'q> sqlx::Encode<'q, Db> for ApplicationId {
    fn encode_by_ref(&self, buf: &mut SqliteArgs<'q>) -> EncodeResult {
        <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed endpoint identifier (`ep_<ULID>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl EndpointId {
    /// Creates a new time-sortable endpoint ID.
    pub fn new() -> Self {
        Self(new_prefixed_id("ep"))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EndpointId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<Db> for EndpointId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for EndpointId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        Ok(Self(<String as sqlx::Decode<Db>>::decode(value)?))
    }
}

impl<'q> sqlx::Encode<'q, Db> for EndpointId {
    fn encode_by_ref(&self, buf: &mut SqliteArgs<'q>) -> EncodeResult {
        <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed message identifier (`msg_<ULID>`).
///
/// This value is receiver-observable: it is sent as the `X-PipeRelay-ID`
/// header and serves as the deduplication key for at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a new time-sortable message ID.
    pub fn new() -> Self {
        Self(new_prefixed_id("msg"))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<Db> for MessageId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for MessageId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        Ok(Self(<String as sqlx::Decode<Db>>::decode(value)?))
    }
}

impl<'q> sqlx::Encode<'q, Db> for MessageId {
    fn encode_by_ref(&self, buf: &mut SqliteArgs<'q>) -> EncodeResult {
        <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery identifier (`dlv_<ULID>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    /// Creates a new time-sortable delivery ID.
    pub fn new() -> Self {
        Self(new_prefixed_id("dlv"))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeliveryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<Db> for DeliveryId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for DeliveryId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        Ok(Self(<String as sqlx::Decode<Db>>::decode(value)?))
    }
}

impl<'q> sqlx::Encode<'q, Db> for DeliveryId {
    fn encode_by_ref(&self, buf: &mut SqliteArgs<'q>) -> EncodeResult {
        <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed attempt identifier (`att_<ULID>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub String);

impl AttemptId {
    /// Creates a new time-sortable attempt ID.
    pub fn new() -> Self {
        Self(new_prefixed_id("att"))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AttemptId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<Db> for AttemptId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for AttemptId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        Ok(Self(<String as sqlx::Decode<Db>>::decode(value)?))
    }
}

impl<'q> sqlx::Encode<'q, Db> for AttemptId {
    fn encode_by_ref(&self, buf: &mut SqliteArgs<'q>) -> EncodeResult {
        <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Application represents a producer tenant.
///
/// Every endpoint, message, and delivery is owned by exactly one
/// application. Producers authenticate with the application's bearer
/// token; deleting an application cascades to all dependent entities.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Application {
    /// Unique identifier for this application.
    pub id: ApplicationId,

    /// Human-readable display name.
    pub name: String,

    /// Opaque bearer token, unique across all applications. Rotatable.
    pub api_key: String,

    /// When this application was created.
    pub created_at: DateTime<Utc>,

    /// When this application was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Creates a new application with a fresh API key.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ApplicationId::new(),
            name: name.into(),
            api_key: new_api_key(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A receiver URL owned by one application.
///
/// Carries the per-endpoint signing secret and the event-type
/// subscription list. Inactive endpoints are skipped at fan-out and by
/// the delivery workers.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Endpoint {
    /// Unique identifier for this endpoint.
    pub id: EndpointId,

    /// Owning application.
    pub app_id: ApplicationId,

    /// Absolute receiver URL (http or https with non-empty host).
    pub url: String,

    /// Free-form operator description.
    pub description: String,

    /// Per-endpoint signing secret, set at creation.
    pub secret: String,

    /// Event-type subscriptions.
    ///
    /// Entries may be exact types, `prefix.*` wildcards, or the
    /// catch-all `*`. An empty list subscribes to everything.
    pub event_types: sqlx::types::Json<Vec<String>>,

    /// Requests-per-second hint for receivers. Stored, never enforced.
    pub rate_limit: i32,

    /// Arbitrary operator-supplied key/value pairs.
    pub metadata: sqlx::types::Json<HashMap<String, String>>,

    /// Whether this endpoint currently receives deliveries.
    pub active: bool,

    /// When this endpoint was created.
    pub created_at: DateTime<Utc>,

    /// When this endpoint was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Creates an active endpoint with a fresh signing secret.
    pub fn new(
        app_id: ApplicationId,
        url: impl Into<String>,
        event_types: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EndpointId::new(),
            app_id,
            url: url.into(),
            description: String::new(),
            secret: new_endpoint_secret(),
            event_types: sqlx::types::Json(event_types),
            rate_limit: 0,
            metadata: sqlx::types::Json(HashMap::new()),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this endpoint's subscription list matches an event type.
    ///
    /// Rules, first match wins per subscription entry:
    /// - an empty list matches every event type
    /// - `*` matches every event type
    /// - `prefix.*` matches `prefix` itself and anything under `prefix.`
    /// - anything else matches by exact equality
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        let subscriptions = &self.event_types.0;
        if subscriptions.is_empty() {
            return true;
        }

        subscriptions.iter().any(|subscription| {
            if subscription == "*" || subscription == event_type {
                return true;
            }
            if let Some(prefix) = subscription.strip_suffix(".*") {
                return event_type == prefix
                    || event_type.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'));
            }
            false
        })
    }
}

/// One ingested event. Immutable after creation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Message {
    /// Unique identifier, sent to receivers as `X-PipeRelay-ID`.
    pub id: MessageId,

    /// Owning application.
    pub app_id: ApplicationId,

    /// Dotted event-type string, e.g. `order.created`.
    pub event_type: String,

    /// Opaque JSON payload, preserved byte for byte.
    ///
    /// Stored raw so the delivered body and the signed bytes are exactly
    /// what the producer submitted.
    pub payload: Vec<u8>,

    /// When the message was ingested.
    pub created_at: DateTime<Utc>,
}

/// Delivery lifecycle status.
///
/// ```text
/// pending ──▶ success            (terminal)
///    │
///    ▼
/// retrying ──▶ success           (terminal)
///    │
///    ▼
/// failed ◀──── manual retry ──▶ retrying
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created by fan-out, never attempted.
    Pending,

    /// At least one attempt failed; waiting for the next retry slot.
    Retrying,

    /// Delivered with a 2xx response. Terminal.
    Success,

    /// Retry budget exhausted. Terminal until an operator retries it.
    Failed,
}

impl DeliveryStatus {
    /// Whether the worker pool is done with this delivery.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Retrying => write!(f, "retrying"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<Db> for DeliveryStatus {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for DeliveryStatus {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<Db>>::decode(value)?;
        match s.as_str() {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, Db> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut SqliteArgs<'q>) -> EncodeResult {
        <String as sqlx::Encode<'q, Db>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// The intent to deliver one message to one endpoint.
///
/// The row in storage is authoritative; workers operate on short-lived
/// value copies and write state back through `update_delivery`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// Message being delivered.
    pub message_id: MessageId,

    /// Destination endpoint.
    pub endpoint_id: EndpointId,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// Number of attempts executed so far.
    pub attempt_count: i32,

    /// When the next attempt becomes due. Always None in terminal states.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When fan-out created this delivery.
    pub created_at: DateTime<Utc>,

    /// When the delivery state last changed.
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Creates a pending delivery for one message/endpoint pair.
    pub fn new(message_id: MessageId, endpoint_id: EndpointId, now: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryId::new(),
            message_id,
            endpoint_id,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Record of one execution of a delivery. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attempt {
    /// Unique identifier for this attempt.
    pub id: AttemptId,

    /// Delivery this attempt belongs to.
    pub delivery_id: DeliveryId,

    /// 1-indexed, monotone per delivery.
    pub attempt_number: i32,

    /// HTTP status code, or 0 when transport failed before a response.
    pub status_code: i32,

    /// First kilobyte of the response body.
    pub response_body: String,

    /// Wall-clock latency of the attempt in milliseconds.
    pub latency_ms: i64,

    /// Transport error description. Empty on transport success.
    pub error: String,

    /// When this attempt was executed.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint_with_subscriptions(subscriptions: &[&str]) -> Endpoint {
        Endpoint::new(
            ApplicationId::new(),
            "https://example.com/hooks",
            subscriptions.iter().map(ToString::to_string).collect(),
            Utc::now(),
        )
    }

    #[test]
    fn ids_carry_their_prefix() {
        assert!(ApplicationId::new().as_str().starts_with("app_"));
        assert!(EndpointId::new().as_str().starts_with("ep_"));
        assert!(MessageId::new().as_str().starts_with("msg_"));
        assert!(DeliveryId::new().as_str().starts_with("dlv_"));
        assert!(AttemptId::new().as_str().starts_with("att_"));
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let first = MessageId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = MessageId::new();

        assert!(first.as_str() < second.as_str());
    }

    #[test]
    fn credentials_have_expected_shape() {
        let api_key = new_api_key();
        assert!(api_key.starts_with("pk_"));
        assert_eq!(api_key.len(), 3 + 32);
        assert!(api_key[3..].chars().all(|c| c.is_ascii_alphanumeric()));

        let secret = new_endpoint_secret();
        assert!(secret.starts_with("whsec_"));
        assert_eq!(secret.len(), 6 + 40);
    }

    #[test]
    fn subscription_matching_rules() {
        assert!(endpoint_with_subscriptions(&[]).subscribes_to("anything.at.all"));
        assert!(endpoint_with_subscriptions(&["*"]).subscribes_to("order.created"));
        assert!(endpoint_with_subscriptions(&["a.*"]).subscribes_to("a"));
        assert!(endpoint_with_subscriptions(&["a.*"]).subscribes_to("a.b"));
        assert!(!endpoint_with_subscriptions(&["a.*"]).subscribes_to("ab"));
        assert!(endpoint_with_subscriptions(&["a"]).subscribes_to("a"));
        assert!(!endpoint_with_subscriptions(&["a"]).subscribes_to("a.b"));
        assert!(
            endpoint_with_subscriptions(&["payment.*", "order.created"])
                .subscribes_to("order.created")
        );
        assert!(!endpoint_with_subscriptions(&["payment.*"]).subscribes_to("order.created"));
    }

    #[test]
    fn endpoint_url_validation() {
        assert!(validate_endpoint_url("https://example.com/hooks").is_ok());
        assert!(validate_endpoint_url("http://10.0.0.1:8080").is_ok());
        assert!(validate_endpoint_url("ftp://example.com").is_err());
        assert!(validate_endpoint_url("https://").is_err());
        assert!(validate_endpoint_url("example.com/hooks").is_err());
    }

    #[test]
    fn delivery_status_display_matches_storage_format() {
        assert_eq!(DeliveryStatus::Pending.to_string(), "pending");
        assert_eq!(DeliveryStatus::Retrying.to_string(), "retrying");
        assert_eq!(DeliveryStatus::Success.to_string(), "success");
        assert_eq!(DeliveryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn terminal_statuses_identified() {
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
    }

    #[test]
    fn new_delivery_starts_pending_with_no_attempts() {
        let delivery = Delivery::new(MessageId::new(), EndpointId::new(), Utc::now());

        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempt_count, 0);
        assert!(delivery.next_retry_at.is_none());
    }
}
