//! REST surface for the PipeRelay webhook delivery service.
//!
//! Producers manage applications and endpoints, push messages, and
//! inspect deliveries and attempts over JSON HTTP. Ingest is
//! synchronous with respect to persistence and fan-out; delivery runs
//! asynchronously in the worker pool.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use piperelay_core::{Clock, Store};

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};

/// Shared state available to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The persistence backend.
    pub store: Arc<dyn Store>,
    /// Wall-clock source.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates handler state over a store and clock.
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}
