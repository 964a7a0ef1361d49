//! Delivery pool: polls the due queue and dispatches bounded workers.
//!
//! One poller task drives the tick loop. Each tick fetches at most
//! `workers` due deliveries; a counting semaphore caps concurrent
//! sends, and the poller blocks on acquiring a permit before spawning,
//! so in-flight work never exceeds the cap. Shutdown is two-staged: a
//! stop signal ends polling and lets in-flight sends finish, and if the
//! grace period expires the ambient cancellation aborts them (each
//! recorded as a cancelled attempt).

use std::{sync::Arc, time::Duration};

use piperelay_core::{Clock, Store};
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    retry::RetryPolicy,
    sender::{Sender, SenderConfig},
    worker::DeliveryWorker,
    DEFAULT_POLL_INTERVAL, DEFAULT_SEND_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, DEFAULT_WORKER_COUNT,
};

/// Configuration for the delivery pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent in-flight deliveries.
    pub workers: usize,

    /// How often the due queue is polled.
    pub poll_interval: Duration,

    /// Per-send timeout, passed through to the sender.
    pub send_timeout: Duration,

    /// How long shutdown waits for in-flight deliveries.
    pub shutdown_grace: Duration,

    /// Retry classification and schedule.
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Poller plus bounded worker set over a shared store.
pub struct DeliveryPool {
    store: Arc<dyn Store>,
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    sender: Arc<Sender>,
    stop: CancellationToken,
    cancel: CancellationToken,
    poller: Option<JoinHandle<()>>,
}

impl DeliveryPool {
    /// Creates a pool. Workers do not run until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(store: Arc<dyn Store>, config: PoolConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.workers == 0 {
            return Err(DeliveryError::configuration("workers must be greater than 0"));
        }
        if config.retry.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be greater than 0"));
        }

        let sender = Arc::new(Sender::new(SenderConfig {
            timeout: config.send_timeout,
            ..SenderConfig::default()
        })?);

        Ok(Self {
            store,
            config,
            clock,
            sender,
            stop: CancellationToken::new(),
            cancel: CancellationToken::new(),
            poller: None,
        })
    }

    /// Spawns the poller task. Returns immediately.
    pub fn start(&mut self) {
        if self.poller.is_some() {
            return;
        }

        info!(
            workers = self.config.workers,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "starting delivery pool"
        );

        let worker = Arc::new(DeliveryWorker::new(
            self.store.clone(),
            self.sender.clone(),
            self.config.retry.clone(),
            self.clock.clone(),
            self.cancel.clone(),
        ));

        let handle = tokio::spawn(poll_loop(
            self.store.clone(),
            self.clock.clone(),
            worker,
            self.config.workers,
            self.config.poll_interval,
            self.stop.clone(),
            self.cancel.clone(),
        ));
        self.poller = Some(handle);
    }

    /// Gracefully stops the pool.
    ///
    /// Signals the poller to stop dispatching, then waits up to the
    /// shutdown grace for in-flight deliveries to finish. On expiry the
    /// ambient cancellation fires, aborting remaining sends.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if in-flight work did not drain in
    /// time, `Internal` if the poller task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("stopping delivery pool");
        self.stop.cancel();

        let Some(handle) = self.poller.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.shutdown_grace, handle).await {
            Ok(Ok(())) => {
                info!("delivery pool stopped");
                Ok(())
            },
            Ok(Err(join_error)) => {
                Err(DeliveryError::internal(format!("poller task panicked: {join_error}")))
            },
            Err(_) => {
                error!(
                    grace_secs = self.config.shutdown_grace.as_secs(),
                    "shutdown grace expired, cancelling in-flight deliveries"
                );
                self.cancel.cancel();
                Err(DeliveryError::ShutdownTimeout { timeout: self.config.shutdown_grace })
            },
        }
    }
}

impl Drop for DeliveryPool {
    fn drop(&mut self) {
        if let Some(handle) = &self.poller {
            if !handle.is_finished() && !self.stop.is_cancelled() {
                warn!("delivery pool dropped while running, cancelling workers");
                self.stop.cancel();
                self.cancel.cancel();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    worker: Arc<DeliveryWorker>,
    workers: usize,
    poll_interval: Duration,
    stop: CancellationToken,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let tracker = TaskTracker::new();

    'poll: loop {
        tokio::select! {
            () = stop.cancelled() => break 'poll,
            () = cancel.cancelled() => break 'poll,
            () = clock.sleep(poll_interval) => {},
        }

        let limit = i64::try_from(workers).unwrap_or(i64::MAX);
        let due = match store.due_deliveries(limit).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to fetch due deliveries");
                continue;
            },
        };
        if due.is_empty() {
            continue;
        }

        debug!(count = due.len(), "dispatching due deliveries");

        for delivery in due {
            // Block on a permit before spawning so in-flight count
            // never exceeds the worker cap.
            let permit = tokio::select! {
                () = stop.cancelled() => break 'poll,
                () = cancel.cancelled() => break 'poll,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break 'poll,
                },
            };

            let worker = worker.clone();
            tracker.spawn(async move {
                worker.process(delivery).await;
                drop(permit);
            });
        }
    }

    // Poller is done dispatching; wait for everything in flight.
    tracker.close();
    tracker.wait().await;
}
