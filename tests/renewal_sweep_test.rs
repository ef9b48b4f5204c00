//! Auto-renewal: enrollment, the periodic sweep, and date advancement only
//! after the webhook confirms payment.

mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use uuid::Uuid;

use memberly_api::{
    errors::ServiceError,
    providers::ProviderId,
    services::orchestrator::CreateOrderCommand,
    services::orders::OrderStatus,
    services::risk::RequestContext,
};

async fn establish_membership(app: &TestApp, user_id: Uuid, plan_id: Uuid) {
    let created = app
        .services
        .orchestrator
        .create_order(CreateOrderCommand {
            user_id,
            plan_id,
            provider: ProviderId::Stripe,
            coupon_code: None,
            ctx: RequestContext::from_ip("198.51.100.30"),
            renewal_subscription_id: None,
            off_session_token: None,
        })
        .await
        .unwrap();
    let (payload, headers) = app.stub_webhook(&format!("stub-{}", created.order_id), "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
}

#[tokio::test]
async fn enable_stores_an_encrypted_token() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    establish_membership(&app, user_id, plan_id).await;

    let sub = app
        .services
        .renewals
        .enable(user_id, plan_id, ProviderId::Stripe, "tok_visa_4242")
        .await
        .unwrap();

    assert_eq!(sub.status, "active");
    assert!(!sub.payment_token_enc.contains("tok_visa_4242"));

    let membership = app.services.memberships.get(user_id).await.unwrap().unwrap();
    assert!(membership.auto_renewal);
    // Enrollment aligned the renewal date with the membership expiry.
    assert_eq!(sub.next_renewal_date, membership.expiry_date);
}

#[tokio::test]
async fn disable_requires_an_enrollment() {
    let app = TestApp::new().await;
    let err = app
        .services
        .renewals
        .disable(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn sweep_initiates_charge_but_never_advances_the_date_itself() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    establish_membership(&app, user_id, plan_id).await;

    let sub = app
        .services
        .renewals
        .enable(user_id, plan_id, ProviderId::Stripe, "tok_visa_4242")
        .await
        .unwrap();
    let due_date = sub.next_renewal_date;
    let days_until_due = (due_date - Utc::now()).num_days() + 2;

    let summary = app
        .services
        .renewals
        .sweep(&app.services.orchestrator, days_until_due)
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 0);

    let sub = app
        .services
        .renewals
        .get_for_user(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        sub.next_renewal_date, due_date,
        "the sweep only initiates; confirmation advances the date"
    );
    assert!(sub.last_attempt_at.is_some());
    let renewal_order_id = sub.last_order_id.expect("charge order recorded");

    // The sweep-created order is pending and off-session.
    let order = app
        .services
        .orchestrator
        .store()
        .get(renewal_order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending.to_string());
    assert_eq!(order.renewal_subscription_id, Some(sub.id));

    // Webhook confirms the charge: membership extends and the date advances.
    let expiry_before = app
        .services
        .memberships
        .get(user_id)
        .await
        .unwrap()
        .unwrap()
        .expiry_date;
    let (payload, headers) = app.stub_webhook(&format!("stub-{renewal_order_id}"), "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();

    let membership = app.services.memberships.get(user_id).await.unwrap().unwrap();
    assert!(membership.expiry_date > expiry_before);

    let sub = app
        .services
        .renewals
        .get_for_user(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.next_renewal_date, membership.expiry_date);
    assert!(sub.last_renewal_date.is_some());
}

#[tokio::test]
async fn failed_charge_is_retried_on_the_next_sweep() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    establish_membership(&app, user_id, plan_id).await;

    let sub = app
        .services
        .renewals
        .enable(user_id, plan_id, ProviderId::Stripe, "tok_visa_4242")
        .await
        .unwrap();
    let due_date = sub.next_renewal_date;
    let days_until_due = (due_date - Utc::now()).num_days() + 2;

    *app.stub.fail_create.lock().unwrap() = true;
    let summary = app
        .services
        .renewals
        .sweep(&app.services.orchestrator, days_until_due)
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);

    // Nothing advanced; the subscription is still due.
    let sub = app
        .services
        .renewals
        .get_for_user(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.next_renewal_date, due_date);

    *app.stub.fail_create.lock().unwrap() = false;
    let summary = app
        .services
        .renewals
        .sweep(&app.services.orchestrator, days_until_due)
        .await
        .unwrap();
    assert_eq!(summary.successful, 1);
}

#[tokio::test]
async fn subscriptions_outside_the_window_are_left_alone() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 365, 1).await;
    let user_id = Uuid::new_v4();
    establish_membership(&app, user_id, plan_id).await;

    app.services
        .renewals
        .enable(user_id, plan_id, ProviderId::Stripe, "tok_visa_4242")
        .await
        .unwrap();

    // Due in ~a year; a three-day lookahead must skip it.
    let summary = app
        .services
        .renewals
        .sweep(&app.services.orchestrator, 3)
        .await
        .unwrap();
    assert_eq!(summary.processed, 0);
}

#[tokio::test]
async fn duplicate_confirmation_does_not_advance_twice() {
    let app = TestApp::new().await;
    let plan_id = app.seed_plan(dec!(30), 30, 1).await;
    let user_id = Uuid::new_v4();
    establish_membership(&app, user_id, plan_id).await;

    app.services
        .renewals
        .enable(user_id, plan_id, ProviderId::Stripe, "tok_visa_4242")
        .await
        .unwrap();
    let days = (app
        .services
        .renewals
        .get_for_user(user_id)
        .await
        .unwrap()
        .unwrap()
        .next_renewal_date
        - Utc::now())
    .num_days()
        + 2;

    app.services
        .renewals
        .sweep(&app.services.orchestrator, days)
        .await
        .unwrap();
    let order_id = app
        .services
        .renewals
        .get_for_user(user_id)
        .await
        .unwrap()
        .unwrap()
        .last_order_id
        .unwrap();

    let (payload, headers) = app.stub_webhook(&format!("stub-{order_id}"), "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    let after_first = app
        .services
        .renewals
        .get_for_user(user_id)
        .await
        .unwrap()
        .unwrap();

    // Redelivery of the confirmation.
    let (payload, headers) = app.stub_webhook(&format!("stub-{order_id}"), "paid", None);
    app.services
        .orchestrator
        .handle_webhook(ProviderId::Stripe, &payload, &headers)
        .await
        .unwrap();
    let after_second = app
        .services
        .renewals
        .get_for_user(user_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(after_first.next_renewal_date, after_second.next_renewal_date);

    let membership = app.services.memberships.get(user_id).await.unwrap().unwrap();
    assert!(membership.expiry_date >= after_first.next_renewal_date - Duration::seconds(1));
}
