//! End-to-end order lifecycle through the orchestrator: creation, webhook
//! reconciliation under duplicate and out-of-order delivery, refunds, and
//! the membership side effects of each.

mod common;

use chrono::Utc;
use common::TestApp;
use rust_decimal_macros::dec;
use uuid::Uuid;

use memberly_api::{
    errors::ServiceError,
    providers::ProviderId,
    services::orchestrator::{CreateOrderCommand, WebhookOutcome},
    services::orders::OrderStatus,
    services::risk::RequestContext,
};

fn order_command(user_id: Uuid, plan_id: Uuid) -> CreateOrderCommand {
    CreateOrderCommand {
        user_id,
        plan_id,
        provider: ProviderId::Stripe,
        coupon_code: None,
        ctx: RequestContext::from_ip("198.51.100.10"),
        renewal_subscription_id: None,
        off_session_token: None,
    }
}

#[tokio::test]
async fn created_order_is_pending_with_provider_reference() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    let created = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();

    assert_eq!(created.status, OrderStatus::Pending);
    assert_eq!(created.original_amount, dec!(30));
    assert_eq!(created.final_amount, dec!(30));

    let order = app
        .services
        .orchestrator
        .store()
        .get(created.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, "pending");
    assert_eq!(
        order.provider_reference.as_deref(),
        Some(format!("stub-{}", created.order_id).as_str())
    );
}

#[tokio::test]
async fn paid_webhook_extends_membership_exactly_once() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    let created = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();
    let reference = format!("stub-{}", created.order_id);

    let (payload, headers) = app.stub_webhook(&reference, "paid", None);
    let outcome = app
        .services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied(OrderStatus::Paid));

    let membership = app
        .services
        .memberships
        .get(user_id)
        .await
        .unwrap()
        .expect("membership created on first payment");
    let first_expiry = membership.expiry_date;
    assert!(first_expiry > Utc::now() + chrono::Duration::days(29));

    // At-least-once delivery: the same webhook arrives again.
    let (payload, headers) = app.stub_webhook(&reference, "paid", None);
    let outcome = app
        .services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyApplied);

    let membership = app.services.memberships.get(user_id).await.unwrap().unwrap();
    assert_eq!(
        membership.expiry_date, first_expiry,
        "duplicate paid webhook must not extend twice"
    );
}

#[tokio::test]
async fn invalid_signature_changes_nothing() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    let created = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();
    let reference = format!("stub-{}", created.order_id);

    let (payload, _) = app.stub_webhook(&reference, "paid", None);
    let headers = http::HeaderMap::new();
    let err = app
        .services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));

    let mut bad = http::HeaderMap::new();
    bad.insert(
        "x-stub-signature",
        http::HeaderValue::from_static("deadbeef"),
    );
    let err = app
        .services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &bad)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SignatureInvalid));

    let order = app
        .services
        .orchestrator
        .store()
        .get(created.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, "pending", "rejected webhook left state alone");
}

#[tokio::test]
async fn paid_after_refunded_is_absorbed_not_errored() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    let created = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();
    let reference = format!("stub-{}", created.order_id);

    let (payload, headers) = app.stub_webhook(&reference, "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();

    app.services
        .orchestrator
        .refund(created.order_id, dec!(30), "customer request")
        .await
        .unwrap();

    // A stale paid notification arrives after the refund: absorbed, acked,
    // status stays refunded.
    let (payload, headers) = app.stub_webhook(&reference, "paid", None);
    let outcome = app
        .services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Absorbed);

    let order = app
        .services
        .orchestrator
        .store()
        .get(created.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, "refunded");
}

#[tokio::test]
async fn out_of_order_delivery_converges_to_paid() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    let created = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();
    let reference = format!("stub-{}", created.order_id);

    // paid arrives before the (stale) pending notification.
    let (payload, headers) = app.stub_webhook(&reference, "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();

    let (payload, headers) = app.stub_webhook(&reference, "pending", None);
    let outcome = app
        .services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Absorbed);

    let order = app
        .services
        .orchestrator
        .store()
        .get(created.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, "paid");
}

#[tokio::test]
async fn refund_reverts_membership_within_prior_term() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    // First paid order establishes the membership.
    let first = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();
    let (payload, headers) = app.stub_webhook(&format!("stub-{}", first.order_id), "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    let expiry_after_first = app
        .services
        .memberships
        .get(user_id)
        .await
        .unwrap()
        .unwrap()
        .expiry_date;

    // Second paid order extends it further.
    let second = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();
    let (payload, headers) = app.stub_webhook(&format!("stub-{}", second.order_id), "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    let expiry_after_second = app
        .services
        .memberships
        .get(user_id)
        .await
        .unwrap()
        .unwrap()
        .expiry_date;
    assert!(expiry_after_second > expiry_after_first);

    // Refunding the second order reverts to the first term.
    app.services
        .orchestrator
        .refund(second.order_id, dec!(30), "changed my mind")
        .await
        .unwrap();

    let membership = app.services.memberships.get(user_id).await.unwrap().unwrap();
    assert_eq!(membership.expiry_date, expiry_after_first);
    assert_eq!(membership.status, "active");
}

#[tokio::test]
async fn refund_requires_paid_status() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    let created = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();

    let err = app
        .services
        .orchestrator
        .refund(created.order_id, dec!(30), "too early")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn provider_failure_leaves_order_closed_not_ambiguous() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    *app.stub.fail_create.lock().unwrap() = true;
    let err = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ProviderUnavailable(_)));
    assert!(err.is_retryable());
    *app.stub.fail_create.lock().unwrap() = false;

    // The only order row for this user is terminally closed.
    let (orders, total) = app
        .services
        .orchestrator
        .store()
        .list_for_user(user_id, 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders[0].status, "closed");
}

#[tokio::test]
async fn status_poll_advances_but_never_rolls_back() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    let created = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap();

    // Provider reports paid on poll: order advances.
    *app.stub.polled_status.lock().unwrap() = memberly_api::providers::NormalizedStatus::Paid;
    let order = app
        .services
        .orchestrator
        .get_order_status(created.order_id, true)
        .await
        .unwrap();
    assert_eq!(order.status, "paid");

    // A later poll claiming pending must not roll the order back.
    *app.stub.polled_status.lock().unwrap() = memberly_api::providers::NormalizedStatus::Pending;
    let order = app
        .services
        .orchestrator
        .get_order_status(created.order_id, true)
        .await
        .unwrap();
    assert_eq!(order.status, "paid");
}

#[tokio::test]
async fn risk_denial_prevents_order_creation() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();

    // Trip the trailing-24h order-count cap.
    for _ in 0..app.config.risk.daily_order_cap {
        app.services
            .orchestrator
            .create_order(order_command(user_id, plan_id))
            .await
            .unwrap();
    }

    let err = app
        .services
        .orchestrator
        .create_order(order_command(user_id, plan_id))
        .await
        .unwrap_err();
    match err {
        ServiceError::RiskDenied { reasons } => {
            assert!(!reasons.is_empty());
        }
        other => panic!("expected RiskDenied, got {other:?}"),
    }

    // Denial happened before any new row was written.
    let (_, total) = app
        .services
        .orchestrator
        .store()
        .list_for_user(user_id, 1, 100)
        .await
        .unwrap();
    assert_eq!(total, u64::from(app.config.risk.daily_order_cap));
}
