//! Deterministic time control for tests.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use piperelay_core::Clock;

/// Virtual clock that only moves when told to.
///
/// `sleep` advances the clock by the requested duration and yields, so
/// retry schedules elapse instantly in tests while remaining ordered.
#[derive(Clone)]
pub struct TestClock {
    now_millis: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock starting at a specific instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { now_millis: Arc::new(AtomicI64::new(start.timestamp_millis())) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.now_millis.fetch_add(millis, Ordering::AcqRel);
    }

    /// Jumps the clock to a specific instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        self.now_millis.store(instant.timestamp_millis(), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let millis = self.now_millis.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
