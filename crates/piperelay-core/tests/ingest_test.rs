//! Fan-out behavior of message ingest.

use piperelay_core::{ingest_message, CoreError, DeliveryStatus, Store, MAX_PAYLOAD_BYTES};
use piperelay_testing::TestEnv;

#[tokio::test]
async fn fanout_creates_one_pending_delivery_per_matching_endpoint() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;

    let orders = env.create_endpoint(&app.id, "https://a.example.com", &["order.*"]).await;
    let payments = env.create_endpoint(&app.id, "https://b.example.com", &["payment.*"]).await;
    let firehose = env.create_endpoint(&app.id, "https://c.example.com", &["*"]).await;
    let inactive =
        env.create_inactive_endpoint(&app.id, "https://d.example.com", &["order.created"]).await;

    let receipt = env.ingest(&app.id, "order.created", br#"{"id":"1"}"#).await;
    assert_eq!(receipt.deliveries_created, 2);

    let deliveries = env
        .store()
        .deliveries_for_message(&receipt.message.id)
        .await
        .expect("load deliveries");
    assert_eq!(deliveries.len(), 2);

    let endpoint_ids: Vec<_> = deliveries.iter().map(|d| d.endpoint_id.clone()).collect();
    assert!(endpoint_ids.contains(&orders.id), "order.* subscriber must match");
    assert!(endpoint_ids.contains(&firehose.id), "catch-all subscriber must match");
    assert!(!endpoint_ids.contains(&payments.id), "payment.* subscriber must not match");
    assert!(!endpoint_ids.contains(&inactive.id), "inactive endpoints never get deliveries");

    for delivery in &deliveries {
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempt_count, 0);
        assert!(delivery.next_retry_at.is_none());
    }
}

#[tokio::test]
async fn empty_subscription_list_receives_everything() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://all.example.com", &[]).await;

    let receipt = env.ingest(&app.id, "user.signed_up", b"{}").await;
    assert_eq!(receipt.deliveries_created, 1);
}

#[tokio::test]
async fn fanout_is_scoped_to_the_owning_application() {
    let env = TestEnv::new();
    let app = env.create_application("mine").await;
    let other = env.create_application("theirs").await;
    env.create_endpoint(&other.id, "https://other.example.com", &["*"]).await;

    let receipt = env.ingest(&app.id, "order.created", b"{}").await;
    assert_eq!(receipt.deliveries_created, 0, "other tenants' endpoints must not match");
}

#[tokio::test]
async fn no_matching_endpoints_creates_message_but_no_deliveries() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://a.example.com", &["payment.*"]).await;

    let receipt = env.ingest(&app.id, "order.created", b"{}").await;
    assert_eq!(receipt.deliveries_created, 0);

    let stored =
        env.store().message(&receipt.message.id).await.expect("load").expect("persisted");
    assert_eq!(stored.event_type, "order.created");
}

#[tokio::test]
async fn payload_at_limit_accepted_one_byte_over_rejected() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://a.example.com", &[]).await;

    let at_limit = vec![b'x'; MAX_PAYLOAD_BYTES];
    let receipt = env.ingest(&app.id, "blob.stored", &at_limit).await;
    assert_eq!(receipt.message.payload.len(), MAX_PAYLOAD_BYTES);

    let over_limit = vec![b'x'; MAX_PAYLOAD_BYTES + 1];
    let err = ingest_message(&*env.store, &*env.clock, &app.id, "blob.stored", over_limit)
        .await
        .expect_err("262145 bytes must be rejected");
    assert!(matches!(err, CoreError::PayloadTooLarge { size_bytes: 262_145, .. }));
}

#[tokio::test]
async fn empty_event_type_and_empty_payload_rejected() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;

    let err = ingest_message(&*env.store, &*env.clock, &app.id, "", b"{}".to_vec())
        .await
        .expect_err("empty event type");
    assert!(matches!(err, CoreError::InvalidInput(_)));

    let err = ingest_message(&*env.store, &*env.clock, &app.id, "order.created", Vec::new())
        .await
        .expect_err("empty payload");
    assert!(matches!(err, CoreError::InvalidInput(_)));
}

#[tokio::test]
async fn endpoints_added_after_ingest_do_not_receive_the_message() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://first.example.com", &["*"]).await;

    let receipt = env.ingest(&app.id, "order.created", b"{}").await;
    env.create_endpoint(&app.id, "https://late.example.com", &["*"]).await;

    let deliveries = env
        .store()
        .deliveries_for_message(&receipt.message.id)
        .await
        .expect("load deliveries");
    assert_eq!(deliveries.len(), 1, "fan-out is a snapshot at ingest time");
}
