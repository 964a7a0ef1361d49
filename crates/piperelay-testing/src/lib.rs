//! Test environment and fixtures for PipeRelay.
//!
//! `TestEnv` wires an in-memory store to a virtual clock so delivery
//! logic, retry schedules, and API handlers can be exercised without a
//! database file or real waiting. Invariant helpers assert the
//! consistency rules every delivery must satisfy.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod time;

use std::sync::Arc;

use piperelay_core::{
    ingest_message, Application, ApplicationId, Clock, Delivery, DeliveryId, Endpoint,
    IngestReceipt, MemoryStore, Store,
};

pub use time::TestClock;

/// Shared fixture: in-memory store plus virtual clock.
pub struct TestEnv {
    /// Store under test.
    pub store: Arc<MemoryStore>,
    /// Controllable time source shared with the store.
    pub clock: Arc<TestClock>,
}

impl TestEnv {
    /// Creates a fresh, empty environment.
    pub fn new() -> Self {
        let clock = Arc::new(TestClock::new());
        let store = Arc::new(MemoryStore::new(clock.clone() as Arc<dyn Clock>));
        Self { store, clock }
    }

    /// The store as a trait object, as production code consumes it.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Creates and persists an application.
    pub async fn create_application(&self, name: &str) -> Application {
        let app = Application::new(name, self.clock.now_utc());
        self.store.create_application(&app).await.expect("create application");
        app
    }

    /// Creates and persists an active endpoint with the given
    /// subscriptions (empty slice subscribes to everything).
    pub async fn create_endpoint(
        &self,
        app_id: &ApplicationId,
        url: &str,
        event_types: &[&str],
    ) -> Endpoint {
        self.create_endpoint_with_active(app_id, url, event_types, true).await
    }

    /// Creates and persists an inactive endpoint.
    pub async fn create_inactive_endpoint(
        &self,
        app_id: &ApplicationId,
        url: &str,
        event_types: &[&str],
    ) -> Endpoint {
        self.create_endpoint_with_active(app_id, url, event_types, false).await
    }

    async fn create_endpoint_with_active(
        &self,
        app_id: &ApplicationId,
        url: &str,
        event_types: &[&str],
        active: bool,
    ) -> Endpoint {
        let mut endpoint = Endpoint::new(
            app_id.clone(),
            url,
            event_types.iter().map(ToString::to_string).collect(),
            self.clock.now_utc(),
        );
        endpoint.active = active;
        self.store.create_endpoint(&endpoint).await.expect("create endpoint");
        endpoint
    }

    /// Ingests a message and fans it out.
    pub async fn ingest(
        &self,
        app_id: &ApplicationId,
        event_type: &str,
        payload: &[u8],
    ) -> IngestReceipt {
        ingest_message(&*self.store, &*self.clock, app_id, event_type, payload.to_vec())
            .await
            .expect("ingest message")
    }

    /// Fetches a delivery that must exist.
    pub async fn delivery(&self, id: &DeliveryId) -> Delivery {
        self.store.delivery(id).await.expect("load delivery").expect("delivery exists")
    }

    /// Asserts the consistency rules for one delivery:
    /// - terminal states carry no next_retry_at
    /// - the attempt count equals the number of attempt rows
    /// - attempt numbers form the contiguous sequence 1..=attempt_count
    pub async fn assert_delivery_consistent(&self, id: &DeliveryId) {
        let delivery = self.delivery(id).await;
        let attempts =
            self.store.attempts_for_delivery(id).await.expect("load attempts");

        if delivery.status.is_terminal() {
            assert!(
                delivery.next_retry_at.is_none(),
                "terminal delivery {id} still has next_retry_at"
            );
        }

        assert_eq!(
            attempts.len(),
            usize::try_from(delivery.attempt_count).unwrap_or(0),
            "attempt rows do not match attempt_count for {id}"
        );

        for (index, attempt) in attempts.iter().enumerate() {
            assert_eq!(
                attempt.attempt_number,
                i32::try_from(index + 1).unwrap_or(i32::MAX),
                "attempt numbers are not contiguous for {id}"
            );
        }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
