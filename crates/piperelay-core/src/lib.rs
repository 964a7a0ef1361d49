//! Core domain models and storage for the PipeRelay webhook delivery
//! service.
//!
//! Provides strongly-typed identifiers, the five persistent entities
//! (applications, endpoints, messages, deliveries, attempts), the
//! abstract store contract with its SQLite and in-memory backends, and
//! the ingest fan-out. The delivery pipeline and the REST surface build
//! on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod ingest;
pub mod models;
pub mod store;
pub mod time;

pub use error::{CoreError, Result};
pub use ingest::{ingest_message, IngestReceipt};
pub use models::{
    new_api_key, new_endpoint_secret, validate_endpoint_url, Application, ApplicationId, Attempt,
    AttemptId, Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, Message, MessageId,
    MAX_PAYLOAD_BYTES, MAX_RESPONSE_BODY_BYTES,
};
pub use store::{memory::MemoryStore, sqlite::SqliteStore, AppStats, Store};
pub use time::{Clock, SystemClock};
