//! Clock abstraction for testable timing.
//!
//! Every component that reads wall-clock time or sleeps does so through
//! `Clock`, so tests can inject a controllable time source instead of
//! waiting out real retry schedules.

use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, Utc};

/// Injectable time source.
///
/// Production code uses [`SystemClock`]; tests substitute a virtual
/// clock that advances on demand.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    ///
    /// Maps to `tokio::time::sleep` in production; a test clock may
    /// advance virtual time and return immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}
