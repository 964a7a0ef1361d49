//! Pool tests: poll, dispatch, retry, and graceful shutdown against a
//! wiremock receiver.
//!
//! These run on the real clock with short poll intervals and retry
//! schedules; dispatch leasing assumes real time between ticks.

use std::{sync::Arc, time::Duration};

use piperelay_core::{DeliveryStatus, MessageId, Store, SystemClock};
use piperelay_delivery::{DeliveryError, DeliveryPool, PoolConfig, RetryPolicy};
use piperelay_testing::TestEnv;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn fast_config(workers: usize, max_attempts: u32, schedule_ms: &[u64]) -> PoolConfig {
    PoolConfig {
        workers,
        poll_interval: Duration::from_millis(25),
        send_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts,
            schedule: schedule_ms.iter().copied().map(Duration::from_millis).collect(),
        },
    }
}

fn start_pool(store: Arc<dyn Store>, config: PoolConfig) -> DeliveryPool {
    let mut pool =
        DeliveryPool::new(store, config, Arc::new(SystemClock::new())).expect("pool builds");
    pool.start();
    pool
}

/// Polls the store until every delivery of the message reaches the
/// expected status, or panics after `timeout`.
async fn wait_for_statuses(
    store: &Arc<dyn Store>,
    message_id: &MessageId,
    expected: DeliveryStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let deliveries = store.deliveries_for_message(message_id).await.expect("load");
        if !deliveries.is_empty() && deliveries.iter().all(|d| d.status == expected) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected:?}; current: {:?}",
            deliveries.iter().map(|d| d.status).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn happy_path_delivers_on_first_tick() {
    let env = TestEnv::new();
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, &mock_server.uri(), &["order.*"]).await;
    let receipt = env.ingest(&app.id, "order.created", br#"{"id":"1"}"#).await;

    let store = env.store();
    let pool = start_pool(store.clone(), fast_config(4, 3, &[100]));

    wait_for_statuses(&store, &receipt.message.id, DeliveryStatus::Success, Duration::from_secs(3))
        .await;

    let deliveries = store.deliveries_for_message(&receipt.message.id).await.expect("load");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].attempt_count, 1);
    env.assert_delivery_consistent(&deliveries[0].id).await;

    pool.shutdown().await.expect("pool stops cleanly");
    mock_server.verify().await;
}

#[tokio::test]
async fn failed_send_is_retried_then_succeeds() {
    let env = TestEnv::new();
    let mock_server = MockServer::start().await;

    // First request fails, every one after that succeeds.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("flaky"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&mock_server)
        .await;

    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, &mock_server.uri(), &[]).await;
    let receipt = env.ingest(&app.id, "order.created", b"{}").await;

    let store = env.store();
    let pool = start_pool(store.clone(), fast_config(4, 3, &[100, 200]));

    wait_for_statuses(&store, &receipt.message.id, DeliveryStatus::Success, Duration::from_secs(5))
        .await;

    let deliveries = store.deliveries_for_message(&receipt.message.id).await.expect("load");
    assert_eq!(deliveries[0].attempt_count, 2);

    let attempts = store.attempts_for_delivery(&deliveries[0].id).await.expect("attempts");
    assert_eq!(attempts.iter().map(|a| a.status_code).collect::<Vec<_>>(), vec![500, 200]);
    env.assert_delivery_consistent(&deliveries[0].id).await;

    pool.shutdown().await.expect("pool stops cleanly");
}

#[tokio::test]
async fn always_failing_receiver_exhausts_retries() {
    let env = TestEnv::new();
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&mock_server)
        .await;

    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, &mock_server.uri(), &[]).await;
    let receipt = env.ingest(&app.id, "order.created", b"{}").await;

    let store = env.store();
    let pool = start_pool(store.clone(), fast_config(4, 2, &[100]));

    wait_for_statuses(&store, &receipt.message.id, DeliveryStatus::Failed, Duration::from_secs(5))
        .await;

    let deliveries = store.deliveries_for_message(&receipt.message.id).await.expect("load");
    assert_eq!(deliveries[0].attempt_count, 2);
    assert!(deliveries[0].next_retry_at.is_none());

    let attempts = store.attempts_for_delivery(&deliveries[0].id).await.expect("attempts");
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.status_code == 500));
    env.assert_delivery_consistent(&deliveries[0].id).await;

    pool.shutdown().await.expect("pool stops cleanly");
}

#[tokio::test]
async fn many_deliveries_drain_through_a_small_worker_cap() {
    let env = TestEnv::new();
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
        .expect(6)
        .mount(&mock_server)
        .await;

    let app = env.create_application("shop").await;
    for _ in 0..6 {
        env.create_endpoint(&app.id, &mock_server.uri(), &[]).await;
    }
    let receipt = env.ingest(&app.id, "order.created", b"{}").await;
    assert_eq!(receipt.deliveries_created, 6);

    let store = env.store();
    let pool = start_pool(store.clone(), fast_config(2, 3, &[100]));

    wait_for_statuses(&store, &receipt.message.id, DeliveryStatus::Success, Duration::from_secs(5))
        .await;

    pool.shutdown().await.expect("pool stops cleanly");
    mock_server.verify().await;
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_deliveries() {
    let env = TestEnv::new();
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&mock_server)
        .await;

    let app = env.create_application("shop").await;
    for _ in 0..10 {
        env.create_endpoint(&app.id, &mock_server.uri(), &[]).await;
    }
    let receipt = env.ingest(&app.id, "order.created", b"{}").await;
    assert_eq!(receipt.deliveries_created, 10);

    let store = env.store();
    let pool = start_pool(store.clone(), fast_config(10, 3, &[100]));

    // Give the poller a tick to put all ten in flight, then shut down
    // while the receiver is still holding the connections open.
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await.expect("in-flight deliveries drain within the grace period");

    let deliveries = store.deliveries_for_message(&receipt.message.id).await.expect("load");
    assert!(
        deliveries.iter().all(|d| d.status == DeliveryStatus::Success),
        "all in-flight deliveries completed before shutdown returned: {:?}",
        deliveries.iter().map(|d| d.status).collect::<Vec<_>>()
    );
    for delivery in &deliveries {
        env.assert_delivery_consistent(&delivery.id).await;
    }
}

#[tokio::test]
async fn shutdown_grace_expiry_cancels_stragglers() {
    let env = TestEnv::new();
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&mock_server)
        .await;

    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, &mock_server.uri(), &[]).await;
    env.ingest(&app.id, "order.created", b"{}").await;

    let store = env.store();
    let config = PoolConfig {
        shutdown_grace: Duration::from_millis(200),
        send_timeout: Duration::from_secs(60),
        ..fast_config(2, 3, &[100])
    };
    let pool = start_pool(store.clone(), config);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = pool.shutdown().await;

    assert!(
        matches!(result, Err(DeliveryError::ShutdownTimeout { .. })),
        "a receiver slower than the grace period must surface a timeout"
    );
}
