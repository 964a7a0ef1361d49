//! REST surface tests over the in-memory store.

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use piperelay_api::{create_router, AppState, Config};
use piperelay_core::{DeliveryStatus, Store};
use piperelay_testing::TestEnv;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_router(env: &TestEnv) -> Router {
    let state = AppState::new(env.store(), env.clock.clone());
    create_router(state, &Config::default())
}

async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&body).expect("json body")
}

fn post_json(uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder =
        Request::builder().method("POST").uri(uri).header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(serde_json::to_vec(body).expect("serialize"))).expect("request")
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let env = TestEnv::new();
    let response =
        test_router(&env).oneshot(get("/health", None)).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["status"], "ok");
}

#[tokio::test]
async fn create_application_returns_bearer_token() {
    let env = TestEnv::new();
    let response = test_router(&env)
        .oneshot(post_json("/api/v1/applications", None, &json!({"name": "checkout"})))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["name"], "checkout");
    assert!(body["id"].as_str().expect("id").starts_with("app_"));
    assert!(body["api_key"].as_str().expect("api_key").starts_with("pk_"));
}

#[tokio::test]
async fn tenant_routes_require_a_valid_bearer_token() {
    let env = TestEnv::new();
    let router = test_router(&env);

    let missing = router.clone().oneshot(get("/api/v1/endpoints", None)).await.expect("response");
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let unknown = router
        .clone()
        .oneshot(get("/api/v1/endpoints", Some("pk_definitely_wrong")))
        .await
        .expect("response");
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

    let app = env.create_application("shop").await;
    let authed =
        router.oneshot(get("/api/v1/endpoints", Some(&app.api_key))).await.expect("response");
    assert_eq!(authed.status(), StatusCode::OK);
}

#[tokio::test]
async fn endpoint_registration_validates_the_url() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    let router = test_router(&env);

    let rejected = router
        .clone()
        .oneshot(post_json(
            "/api/v1/endpoints",
            Some(&app.api_key),
            &json!({"url": "ftp://example.com/hooks"}),
        ))
        .await
        .expect("response");
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let created = router
        .oneshot(post_json(
            "/api/v1/endpoints",
            Some(&app.api_key),
            &json!({"url": "https://example.com/hooks", "event_types": ["order.*"]}),
        ))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);

    let body = response_json(created).await;
    assert!(body["id"].as_str().expect("id").starts_with("ep_"));
    assert!(body["secret"].as_str().expect("secret").starts_with("whsec_"));
    assert_eq!(body["active"], true);
    assert_eq!(body["event_types"], json!(["order.*"]));
}

#[tokio::test]
async fn sending_a_message_fans_out_and_returns_202() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://a.example.com", &["order.*"]).await;
    env.create_endpoint(&app.id, "https://b.example.com", &["payment.*"]).await;

    let response = test_router(&env)
        .oneshot(post_json(
            "/api/v1/messages",
            Some(&app.api_key),
            &json!({"event_type": "order.created", "payload": {"id": "1", "total": 42}}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = response_json(response).await;
    assert_eq!(body["deliveries"], 1);
    assert!(body["message"]["id"].as_str().expect("id").starts_with("msg_"));
    assert_eq!(body["message"]["payload"]["total"], 42);
}

#[tokio::test]
async fn oversized_payload_is_rejected_with_400() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;

    // A JSON string whose raw text exceeds 256 KiB.
    let oversized = "x".repeat(262_200);
    let response = test_router(&env)
        .oneshot(post_json(
            "/api/v1/messages",
            Some(&app.api_key),
            &json!({"event_type": "blob.stored", "payload": oversized}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn message_detail_includes_its_deliveries() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://a.example.com", &[]).await;
    let receipt = env.ingest(&app.id, "order.created", br#"{"id":"1"}"#).await;

    let response = test_router(&env)
        .oneshot(get(&format!("/api/v1/messages/{}", receipt.message.id), Some(&app.api_key)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["message"]["event_type"], "order.created");
    assert_eq!(body["deliveries"].as_array().expect("deliveries").len(), 1);
    assert_eq!(body["deliveries"][0]["status"], "pending");
}

#[tokio::test]
async fn manual_retry_flips_failed_deliveries() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://a.example.com", &[]).await;
    let receipt = env.ingest(&app.id, "order.created", b"{}").await;

    // Drive the only delivery into the terminal failed state.
    let store = env.store();
    let mut delivery = store
        .deliveries_for_message(&receipt.message.id)
        .await
        .expect("load")
        .remove(0);
    delivery.status = DeliveryStatus::Failed;
    delivery.attempt_count = 8;
    delivery.next_retry_at = None;
    store.update_delivery(&delivery).await.expect("update");

    let response = test_router(&env)
        .oneshot(post_json(
            &format!("/api/v1/messages/{}/retry", receipt.message.id),
            Some(&app.api_key),
            &json!({}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["retried"], 1);

    let flipped = store.delivery(&delivery.id).await.expect("load").expect("exists");
    assert_eq!(flipped.status, DeliveryStatus::Retrying);
    assert_eq!(flipped.attempt_count, 8, "manual retry preserves attempt history");
}

#[tokio::test]
async fn delivery_attempts_are_listable() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://a.example.com", &[]).await;
    let receipt = env.ingest(&app.id, "order.created", b"{}").await;

    let store = env.store();
    let delivery = store
        .deliveries_for_message(&receipt.message.id)
        .await
        .expect("load")
        .remove(0);

    let response = test_router(&env)
        .oneshot(get(
            &format!("/api/v1/deliveries/{}/attempts", delivery.id),
            Some(&app.api_key),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await.as_array().expect("array").len(), 0);
}

#[tokio::test]
async fn unknown_ids_return_404() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    let router = test_router(&env);

    for uri in [
        "/api/v1/messages/msg_nope".to_string(),
        "/api/v1/deliveries/dlv_nope".to_string(),
        "/api/v1/endpoints/ep_nope".to_string(),
    ] {
        let response =
            router.clone().oneshot(get(&uri, Some(&app.api_key))).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn rotate_key_invalidates_the_previous_token() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    let router = test_router(&env);

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/applications/{}/rotate-key", app.id),
            None,
            &json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let new_key = response_json(response).await["api_key"].as_str().expect("key").to_string();
    assert_ne!(new_key, app.api_key);

    let stale = router
        .clone()
        .oneshot(get("/api/v1/endpoints", Some(&app.api_key)))
        .await
        .expect("response");
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);

    let fresh = router.oneshot(get("/api/v1/endpoints", Some(&new_key))).await.expect("response");
    assert_eq!(fresh.status(), StatusCode::OK);
}

#[tokio::test]
async fn endpoint_toggle_flips_active_flag() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    let endpoint = env.create_endpoint(&app.id, "https://a.example.com", &[]).await;
    let router = test_router(&env);

    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/v1/endpoints/{}/toggle", endpoint.id))
        .header(AUTHORIZATION, format!("Bearer {}", app.api_key))
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["active"], false);

    let stored = env.store().endpoint(&endpoint.id).await.expect("load").expect("exists");
    assert!(!stored.active);
}

#[tokio::test]
async fn stats_reflect_ingested_traffic() {
    let env = TestEnv::new();
    let app = env.create_application("shop").await;
    env.create_endpoint(&app.id, "https://a.example.com", &[]).await;
    env.ingest(&app.id, "order.created", b"{}").await;

    let response = test_router(&env)
        .oneshot(get("/api/v1/stats", Some(&app.api_key)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["total_messages"], 1);
    assert_eq!(body["total_deliveries"], 1);
    assert_eq!(body["pending_count"], 1);
    assert_eq!(body["active_endpoints"], 1);
}
