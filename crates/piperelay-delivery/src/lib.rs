//! Webhook delivery pipeline with at-least-once guarantees.
//!
//! Drains the durable due queue through a bounded worker set:
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            │                Store                 │
//!            │   deliveries (pending | retrying)    │
//!            │   leased on claim, oldest first      │
//!            └──────────────────┬───────────────────┘
//!                               │ due_deliveries(workers), every tick
//!                               ▼
//!                        ┌────────────┐
//!                        │   Poller   │── semaphore cap ──┐
//!                        └────────────┘                   │
//!                  ┌────────────┼────────────┐            ▼
//!                  ▼            ▼            ▼     at most `workers`
//!             ┌────────┐   ┌────────┐   ┌────────┐  in flight
//!             │ Worker │   │ Worker │   │ Worker │
//!             └───┬────┘   └───┬────┘   └───┬────┘
//!                 ▼            ▼            ▼
//!              signed HTTP POST to receiver endpoints
//! ```
//!
//! Each worker records an attempt row and advances the delivery state
//! (success / retrying + next retry / failed). Duplicate sends are
//! possible across crash windows; receivers dedupe on `X-PipeRelay-ID`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

pub mod error;
pub mod pool;
pub mod retry;
pub mod sender;
pub mod signing;
pub mod worker;

pub use error::{DeliveryError, Result};
pub use pool::{DeliveryPool, PoolConfig};
pub use retry::{default_retry_schedule, RetryDecision, RetryPolicy};
pub use sender::{SendOutcome, Sender, SenderConfig};
pub use worker::DeliveryWorker;

/// Default maximum concurrent in-flight deliveries.
pub const DEFAULT_WORKER_COUNT: usize = 50;

/// Default due-queue poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default shutdown grace for in-flight deliveries.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
