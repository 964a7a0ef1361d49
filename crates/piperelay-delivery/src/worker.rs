//! Delivery worker: processes one due delivery end to end.
//!
//! Loads the message and endpoint, sends through the shared sender,
//! appends the attempt record, and advances the delivery state per the
//! retry policy. The attempt insert and the state update are
//! independent writes; losing the second re-runs the delivery on a
//! later poll, which is the accepted at-least-once artifact.

use std::sync::Arc;

use piperelay_core::{Attempt, AttemptId, Clock, Delivery, DeliveryStatus, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    retry::{RetryDecision, RetryPolicy},
    sender::Sender,
};

/// Processes individual deliveries on behalf of the pool.
pub struct DeliveryWorker {
    store: Arc<dyn Store>,
    sender: Arc<Sender>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl DeliveryWorker {
    /// Creates a worker sharing the pool's store, sender, and ambient
    /// cancellation token.
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<Sender>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self { store, sender, policy, clock, cancel }
    }

    /// Processes one delivery.
    ///
    /// Never returns an error: every failure mode either abandons the
    /// row for a later poll (transient store errors) or resolves it
    /// (missing parents, state transitions).
    pub async fn process(&self, mut delivery: Delivery) {
        let message = match self.store.message(&delivery.message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                // The parent was cascade-removed under our read; drop
                // the orphaned row instead of re-picking it forever.
                warn!(
                    delivery_id = %delivery.id,
                    message_id = %delivery.message_id,
                    "message gone, removing orphaned delivery"
                );
                self.remove_orphan(&delivery).await;
                return;
            },
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "failed to load message");
                return;
            },
        };

        let endpoint = match self.store.endpoint(&delivery.endpoint_id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                warn!(
                    delivery_id = %delivery.id,
                    endpoint_id = %delivery.endpoint_id,
                    "endpoint gone, removing orphaned delivery"
                );
                self.remove_orphan(&delivery).await;
                return;
            },
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "failed to load endpoint");
                return;
            },
        };

        if !endpoint.active {
            // Left untouched on purpose: inactive endpoints are flipped
            // manually and rarely; the row becomes eligible again when
            // its lease expires.
            debug!(delivery_id = %delivery.id, "skipping delivery to inactive endpoint");
            return;
        }

        let outcome = self
            .sender
            .send(
                &endpoint.url,
                &endpoint.secret,
                message.id.as_str(),
                &message.payload,
                &self.cancel,
            )
            .await;

        delivery.attempt_count += 1;
        let now = self.clock.now_utc();

        let attempt = Attempt {
            id: AttemptId::new(),
            delivery_id: delivery.id.clone(),
            attempt_number: delivery.attempt_count,
            status_code: i32::from(outcome.status_code),
            response_body: outcome.response_body.clone(),
            latency_ms: outcome.latency_ms,
            error: outcome.error.clone(),
            created_at: now,
        };
        if let Err(e) = self.store.create_attempt(&attempt).await {
            error!(delivery_id = %delivery.id, error = %e, "failed to record attempt");
        }

        let attempt_count = u32::try_from(delivery.attempt_count).unwrap_or(u32::MAX);
        match self.policy.decide(attempt_count, &outcome, now) {
            RetryDecision::Success => {
                delivery.status = DeliveryStatus::Success;
                delivery.next_retry_at = None;
                info!(
                    delivery_id = %delivery.id,
                    status_code = outcome.status_code,
                    latency_ms = outcome.latency_ms,
                    "delivery succeeded"
                );
            },
            RetryDecision::Retry { next_retry_at } => {
                delivery.status = DeliveryStatus::Retrying;
                delivery.next_retry_at = Some(next_retry_at);
                info!(
                    delivery_id = %delivery.id,
                    attempt = delivery.attempt_count,
                    status_code = outcome.status_code,
                    next_retry_at = %next_retry_at,
                    "delivery scheduled for retry"
                );
            },
            RetryDecision::Fail => {
                delivery.status = DeliveryStatus::Failed;
                delivery.next_retry_at = None;
                warn!(
                    delivery_id = %delivery.id,
                    attempts = delivery.attempt_count,
                    status_code = outcome.status_code,
                    error = %outcome.error,
                    "delivery permanently failed"
                );
            },
        }

        if let Err(e) = self.store.update_delivery(&delivery).await {
            // The attempt row exists but the delivery did not advance;
            // a later poll re-runs it (at-least-once).
            error!(delivery_id = %delivery.id, error = %e, "failed to update delivery state");
        }
    }

    async fn remove_orphan(&self, delivery: &Delivery) {
        if let Err(e) = self.store.delete_delivery(&delivery.id).await {
            error!(delivery_id = %delivery.id, error = %e, "failed to remove orphaned delivery");
        }
    }
}
