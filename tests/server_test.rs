mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use std::sync::Arc;
use tower::ServiceExt;
use train_gateway::server::{create_server, AppState, PAYMENT_PATH, TRAIN_PATH};

fn router(store: Arc<FakeStore>, accounts: Arc<FakeAccounts>) -> Router {
    let h = strict_harness(store);
    create_server(AppState {
        train: Arc::new(h.use_case),
        payment: Arc::new(payment_use_case(accounts)),
        metrics: None,
    })
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = router(FakeStore::with_objects(&[]), FakeAccounts::with_user("user-1"));

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "healthy");
}

#[tokio::test]
async fn test_train_success_shape() {
    let app = router(
        FakeStore::with_objects(&[("b.png", "b"), ("a.png", "a")]),
        FakeAccounts::with_user("user-1"),
    );

    let resp = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(TRAIN_PATH)
                .header(header::AUTHORIZATION, GOOD_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    let body = json_body(resp).await;
    assert_eq!(body["message"], "Ready for training");
    assert_eq!(body["data"]["item_count"], 2);
    assert_eq!(body["data"]["batch_id"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_train_unauthorized_shape() {
    let app = router(FakeStore::with_objects(&[("a.png", "a")]), FakeAccounts::with_user("user-1"));

    let resp = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(TRAIN_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_train_forbidden() {
    let app = router(FakeStore::with_objects(&[("a.png", "a")]), FakeAccounts::with_user("user-1"));

    let resp = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(TRAIN_PATH)
                .header(header::AUTHORIZATION, "Bearer banned")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_train_preflight() {
    let app = router(FakeStore::with_objects(&[]), FakeAccounts::with_user("user-1"));

    let resp = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri(TRAIN_PATH)
                .header(header::ORIGIN, "http://localhost:5173")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let allowed = resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(allowed.contains("authorization"));
    assert!(allowed.contains("apikey"));
    assert!(allowed.contains("x-client-info"));
    assert_eq!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
}

#[tokio::test]
async fn test_payment_done() {
    let app = router(FakeStore::with_objects(&[]), FakeAccounts::with_user("user-1"));
    let body = checkout_event("evt_http_1", Some("user-1"), None);

    let resp = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(PAYMENT_PATH)
                .header("stripe-signature", signed(&body))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, serde_json::json!({ "done": true }));
}

#[tokio::test]
async fn test_payment_missing_signature_is_bad_request() {
    let app = router(FakeStore::with_objects(&[]), FakeAccounts::with_user("user-1"));
    let body = checkout_event("evt_http_2", Some("user-1"), None);

    let resp = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(PAYMENT_PATH)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "verification_failed");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let app = router(FakeStore::with_objects(&[]), FakeAccounts::with_user("user-1"));

    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
