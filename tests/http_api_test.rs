//! HTTP surface behavior: auth gating, webhook acks, health.

mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use common::TestApp;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn router(app: &TestApp) -> Router {
    use axum::routing::get;
    Router::new()
        .route("/health", get(memberly_api::handlers::health::health))
        .nest("/api/v1", memberly_api::api_v1_routes())
        .with_state(app.state())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;
    let response = router(&app)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn order_creation_requires_a_bearer_token() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "plan_id": plan_id, "provider": "stripe" }).to_string(),
        ))
        .unwrap();

    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn order_creation_round_trips_over_http() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    let token = app.issue_token(user_id, false);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .header("x-forwarded-for", "198.51.100.40")
        .body(Body::from(
            json!({ "plan_id": plan_id, "provider": "stripe" }).to_string(),
        ))
        .unwrap();

    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["final_amount"], "30");
    assert!(body["data"]["redirect"]["value"]
        .as_str()
        .unwrap()
        .starts_with("https://pay.test/"));
}

#[tokio::test]
async fn unknown_provider_webhook_is_not_found() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/webhooks/paypal")
        .body(Body::from("{}"))
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_unauthorized() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    let token = app.issue_token(user_id, false);

    // Create an order so the reference exists.
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({ "plan_id": plan_id, "provider": "stripe" }).to_string(),
        ))
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    let order_id = body_json(response).await["data"]["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/webhooks/stripe")
        .header("x-stub-signature", "deadbeef")
        .body(Body::from(
            json!({ "reference": format!("stub-{order_id}"), "status": "paid" }).to_string(),
        ))
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_webhook_gets_the_provider_ack_body() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    let token = app.issue_token(user_id, false);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({ "plan_id": plan_id, "provider": "stripe" }).to_string(),
        ))
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    let order_id = body_json(response).await["data"]["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (payload, headers) = app.stub_webhook(&format!("stub-{order_id}"), "paid", None);
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/webhooks/stripe");
    for (name, value) in headers.iter() {
        request = request.header(name, value);
    }
    let response = router(&app)
        .oneshot(request.body(Body::from(payload)).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"success");
}

#[tokio::test]
async fn users_cannot_read_each_others_orders() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();

    let token = app.issue_token(owner, false);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({ "plan_id": plan_id, "provider": "stripe" }).to_string(),
        ))
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    let order_id = body_json(response).await["data"]["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let stranger_token = app.issue_token(stranger, false);
    let request = Request::builder()
        .uri(format!("/api/v1/orders/{order_id}"))
        .header("authorization", format!("Bearer {stranger_token}"))
        .body(Body::empty())
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // An administrator can.
    let admin_token = app.issue_token(Uuid::new_v4(), true);
    let request = Request::builder()
        .uri(format!("/api/v1/orders/{order_id}"))
        .header("authorization", format!("Bearer {admin_token}"))
        .body(Body::empty())
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn refund_endpoint_is_admin_only() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    let token = app.issue_token(user_id, false);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({ "plan_id": plan_id, "provider": "stripe" }).to_string(),
        ))
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    let order_id = body_json(response).await["data"]["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/v1/orders/{order_id}/refund"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({ "amount": "30", "reason": "nope" }).to_string(),
        ))
        .unwrap();
    let response = router(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
