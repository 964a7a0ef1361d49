//! In-memory store.
//!
//! Implements [`Store`] with plain maps behind a single async mutex. It
//! exists for tests and for deployments where durability is not
//! required; all state is lost on restart. Semantics mirror the SQLite
//! backend exactly: cascade deletes, due-queue ordering by creation
//! time, and dispatch leases.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    error::{CoreError, Result},
    models::{
        Application, ApplicationId, Attempt, Delivery, DeliveryId, DeliveryStatus, Endpoint,
        EndpointId, Message, MessageId,
    },
    store::{AppStats, Store, DELIVERY_LEASE_SECS},
    time::Clock,
};

#[derive(Default)]
struct Inner {
    applications: HashMap<ApplicationId, Application>,
    endpoints: HashMap<EndpointId, Endpoint>,
    messages: HashMap<MessageId, Message>,
    deliveries: HashMap<DeliveryId, Delivery>,
    leases: HashMap<DeliveryId, DateTime<Utc>>,
    attempts: Vec<Attempt>,
}

impl Inner {
    fn remove_delivery_cascade(&mut self, delivery_id: &DeliveryId) {
        self.deliveries.remove(delivery_id);
        self.leases.remove(delivery_id);
        self.attempts.retain(|a| &a.delivery_id != delivery_id);
    }

    fn remove_message_cascade(&mut self, message_id: &MessageId) {
        self.messages.remove(message_id);
        let delivery_ids: Vec<DeliveryId> = self
            .deliveries
            .values()
            .filter(|d| &d.message_id == message_id)
            .map(|d| d.id.clone())
            .collect();
        for id in delivery_ids {
            self.remove_delivery_cascade(&id);
        }
    }

    fn remove_endpoint_cascade(&mut self, endpoint_id: &EndpointId) {
        self.endpoints.remove(endpoint_id);
        let delivery_ids: Vec<DeliveryId> = self
            .deliveries
            .values()
            .filter(|d| &d.endpoint_id == endpoint_id)
            .map(|d| d.id.clone())
            .collect();
        for id in delivery_ids {
            self.remove_delivery_cascade(&id);
        }
    }
}

/// Non-durable [`Store`] backend.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { inner: Mutex::new(Inner::default()), clock }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_application(&self, app: &Application) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.applications.values().any(|a| a.api_key == app.api_key) {
            return Err(CoreError::Conflict("api_key already in use".into()));
        }
        inner.applications.insert(app.id.clone(), app.clone());
        Ok(())
    }

    async fn application(&self, id: &ApplicationId) -> Result<Option<Application>> {
        Ok(self.inner.lock().await.applications.get(id).cloned())
    }

    async fn application_by_api_key(&self, api_key: &str) -> Result<Option<Application>> {
        let inner = self.inner.lock().await;
        Ok(inner.applications.values().find(|a| a.api_key == api_key).cloned())
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        let inner = self.inner.lock().await;
        let mut apps: Vec<Application> = inner.applications.values().cloned().collect();
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apps)
    }

    async fn delete_application(&self, id: &ApplicationId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.applications.remove(id);

        let endpoint_ids: Vec<EndpointId> = inner
            .endpoints
            .values()
            .filter(|e| &e.app_id == id)
            .map(|e| e.id.clone())
            .collect();
        for endpoint_id in endpoint_ids {
            inner.remove_endpoint_cascade(&endpoint_id);
        }

        let message_ids: Vec<MessageId> =
            inner.messages.values().filter(|m| &m.app_id == id).map(|m| m.id.clone()).collect();
        for message_id in message_ids {
            inner.remove_message_cascade(&message_id);
        }

        Ok(())
    }

    async fn rotate_api_key(&self, id: &ApplicationId, api_key: &str) -> Result<()> {
        let now = self.clock.now_utc();
        let mut inner = self.inner.lock().await;
        if let Some(app) = inner.applications.get_mut(id) {
            app.api_key = api_key.to_string();
            app.updated_at = now;
        }
        Ok(())
    }

    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.endpoints.insert(endpoint.id.clone(), endpoint.clone());
        Ok(())
    }

    async fn endpoint(&self, id: &EndpointId) -> Result<Option<Endpoint>> {
        Ok(self.inner.lock().await.endpoints.get(id).cloned())
    }

    async fn list_endpoints(&self, app_id: &ApplicationId) -> Result<Vec<Endpoint>> {
        let inner = self.inner.lock().await;
        let mut endpoints: Vec<Endpoint> =
            inner.endpoints.values().filter(|e| &e.app_id == app_id).cloned().collect();
        endpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(endpoints)
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let now = self.clock.now_utc();
        let mut inner = self.inner.lock().await;
        if let Some(stored) = inner.endpoints.get_mut(&endpoint.id) {
            stored.url = endpoint.url.clone();
            stored.description = endpoint.description.clone();
            stored.event_types = endpoint.event_types.clone();
            stored.rate_limit = endpoint.rate_limit;
            stored.metadata = endpoint.metadata.clone();
            stored.active = endpoint.active;
            stored.updated_at = now;
        }
        Ok(())
    }

    async fn delete_endpoint(&self, id: &EndpointId) -> Result<()> {
        self.inner.lock().await.remove_endpoint_cascade(id);
        Ok(())
    }

    async fn set_endpoint_active(&self, id: &EndpointId, active: bool) -> Result<()> {
        let now = self.clock.now_utc();
        let mut inner = self.inner.lock().await;
        if let Some(endpoint) = inner.endpoints.get_mut(id) {
            endpoint.active = active;
            endpoint.updated_at = now;
        }
        Ok(())
    }

    async fn active_endpoints_for_event(
        &self,
        app_id: &ApplicationId,
        event_type: &str,
    ) -> Result<Vec<Endpoint>> {
        let inner = self.inner.lock().await;
        let mut endpoints: Vec<Endpoint> = inner
            .endpoints
            .values()
            .filter(|e| &e.app_id == app_id && e.active && e.subscribes_to(event_type))
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(endpoints)
    }

    async fn create_message(&self, message: &Message) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.inner.lock().await.messages.get(id).cloned())
    }

    async fn list_messages(
        &self,
        app_id: &ApplicationId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let inner = self.inner.lock().await;
        let mut messages: Vec<Message> =
            inner.messages.values().filter(|m| &m.app_id == app_id).cloned().collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(messages
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn create_delivery(&self, delivery: &Delivery) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn delivery(&self, id: &DeliveryId) -> Result<Option<Delivery>> {
        Ok(self.inner.lock().await.deliveries.get(id).cloned())
    }

    async fn deliveries_for_message(&self, message_id: &MessageId) -> Result<Vec<Delivery>> {
        let inner = self.inner.lock().await;
        let mut deliveries: Vec<Delivery> =
            inner.deliveries.values().filter(|d| &d.message_id == message_id).cloned().collect();
        deliveries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(deliveries)
    }

    async fn update_delivery(&self, delivery: &Delivery) -> Result<()> {
        let now = self.clock.now_utc();
        let mut inner = self.inner.lock().await;
        if let Some(stored) = inner.deliveries.get_mut(&delivery.id) {
            stored.status = delivery.status;
            stored.attempt_count = delivery.attempt_count;
            stored.next_retry_at = delivery.next_retry_at;
            stored.updated_at = now;
        }
        inner.leases.remove(&delivery.id);
        Ok(())
    }

    async fn due_deliveries(&self, limit: i64) -> Result<Vec<Delivery>> {
        let now = self.clock.now_utc();
        let mut inner = self.inner.lock().await;

        let mut due: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|d| {
                !d.status.is_terminal()
                    && d.next_retry_at.is_none_or(|at| at <= now)
                    && inner.leases.get(&d.id).is_none_or(|until| *until <= now)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        due.truncate(usize::try_from(limit).unwrap_or(0));

        let leased_until = now + chrono::Duration::seconds(DELIVERY_LEASE_SECS);
        for delivery in &due {
            inner.leases.insert(delivery.id.clone(), leased_until);
        }

        Ok(due)
    }

    async fn delete_delivery(&self, id: &DeliveryId) -> Result<()> {
        self.inner.lock().await.remove_delivery_cascade(id);
        Ok(())
    }

    async fn retry_failed_for_message(&self, message_id: &MessageId) -> Result<u64> {
        let now = self.clock.now_utc();
        let mut inner = self.inner.lock().await;

        let mut flipped = 0;
        let failed_ids: Vec<DeliveryId> = inner
            .deliveries
            .values()
            .filter(|d| {
                &d.message_id == message_id
                    && matches!(d.status, DeliveryStatus::Failed)
            })
            .map(|d| d.id.clone())
            .collect();
        for id in failed_ids {
            if let Some(delivery) = inner.deliveries.get_mut(&id) {
                delivery.status = DeliveryStatus::Retrying;
                delivery.next_retry_at = Some(now);
                delivery.updated_at = now;
                flipped += 1;
            }
            inner.leases.remove(&id);
        }

        Ok(flipped)
    }

    async fn create_attempt(&self, attempt: &Attempt) -> Result<()> {
        self.inner.lock().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for_delivery(&self, delivery_id: &DeliveryId) -> Result<Vec<Attempt>> {
        let inner = self.inner.lock().await;
        let mut attempts: Vec<Attempt> =
            inner.attempts.iter().filter(|a| &a.delivery_id == delivery_id).cloned().collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn stats(&self, app_id: &ApplicationId) -> Result<AppStats> {
        let inner = self.inner.lock().await;

        let message_ids: HashSet<&MessageId> = inner
            .messages
            .values()
            .filter(|m| &m.app_id == app_id)
            .map(|m| &m.id)
            .collect();

        let deliveries: Vec<&Delivery> = inner
            .deliveries
            .values()
            .filter(|d| message_ids.contains(&d.message_id))
            .collect();

        let total_deliveries = deliveries.len() as i64;
        let success_count = deliveries
            .iter()
            .filter(|d| matches!(d.status, DeliveryStatus::Success))
            .count() as i64;
        let failed_count = deliveries
            .iter()
            .filter(|d| matches!(d.status, DeliveryStatus::Failed))
            .count() as i64;
        let pending_count = deliveries.iter().filter(|d| !d.status.is_terminal()).count() as i64;

        let endpoints: Vec<&Endpoint> =
            inner.endpoints.values().filter(|e| &e.app_id == app_id).collect();

        let success_rate = if total_deliveries > 0 {
            success_count as f64 / total_deliveries as f64 * 100.0
        } else {
            0.0
        };

        Ok(AppStats {
            total_messages: message_ids.len() as i64,
            total_deliveries,
            success_count,
            failed_count,
            pending_count,
            success_rate,
            total_endpoints: endpoints.len() as i64,
            active_endpoints: endpoints.iter().filter(|e| e.active).count() as i64,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
