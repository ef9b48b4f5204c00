//! Shared harness: an application service graph over a throwaway SQLite
//! database, with a stub payment provider that needs no network.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use http::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use memberly_api::{
    config::AppConfig,
    db::DbPool,
    entities::{coupon, membership_plan},
    events::EventSender,
    handlers::AppServices,
    migrator::Migrator,
    providers::{
        signature::hmac_sha256_hex, NormalizedStatus, ProviderAck, ProviderAdapter, ProviderError,
        ProviderId, ProviderOrder, ProviderOrderSpec, ProviderRegistry, RedirectPayload,
        RefundReference, WebhookNotice,
    },
    services::{
        coupons::CouponService,
        memberships::MembershipService,
        orchestrator::PaymentOrchestrator,
        orders::OrderStore,
        renewals::RenewalService,
        risk::RiskAssessor,
        token_vault::{AesGcmTokenVault, TokenCipher},
    },
    AppState,
};

pub const STUB_WEBHOOK_SECRET: &str = "stub_webhook_secret_for_tests";
pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// In-process stand-in for a payment network. Deterministic references,
/// no outbound calls, and a real HMAC-verified webhook scheme so the full
/// reconciliation path is exercised.
pub struct StubProvider {
    provider_id: ProviderId,
    webhook_secret: String,
    /// When set, create_order fails with a retryable network error.
    pub fail_create: Mutex<bool>,
    /// Status returned by query_status.
    pub polled_status: Mutex<NormalizedStatus>,
}

impl StubProvider {
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            webhook_secret: STUB_WEBHOOK_SECRET.to_string(),
            fail_create: Mutex::new(false),
            polled_status: Mutex::new(NormalizedStatus::Pending),
        }
    }
}

#[async_trait]
impl ProviderAdapter for StubProvider {
    fn id(&self) -> ProviderId {
        self.provider_id
    }

    async fn create_order(&self, spec: &ProviderOrderSpec) -> Result<ProviderOrder, ProviderError> {
        if *self.fail_create.lock().unwrap() {
            return Err(ProviderError::Network("stub provider offline".into()));
        }
        Ok(ProviderOrder {
            provider_reference: format!("stub-{}", spec.order_id),
            redirect: RedirectPayload::Url(format!("https://pay.test/{}", spec.order_id)),
            expires_at: Utc::now() + Duration::minutes(spec.expires_in_minutes),
        })
    }

    async fn query_status(&self, _reference: &str) -> Result<NormalizedStatus, ProviderError> {
        Ok(*self.polled_status.lock().unwrap())
    }

    async fn refund(
        &self,
        reference: &str,
        _amount: Decimal,
        _reason: &str,
    ) -> Result<RefundReference, ProviderError> {
        Ok(RefundReference(format!("refund-{reference}")))
    }

    async fn close(&self, _reference: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn verify_and_parse_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookNotice, ProviderError> {
        let signature = headers
            .get("x-stub-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing signature".into()))?;
        let expected = hmac_sha256_hex(&self.webhook_secret, payload);
        if expected != signature {
            return Err(ProviderError::InvalidSignature);
        }

        let body: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;
        let reference = body["reference"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidPayload("missing reference".into()))?
            .to_string();
        let status: NormalizedStatus = body["status"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("bad status".into()))?;
        let event_id = body["event_id"].as_str().map(str::to_string);

        Ok(WebhookNotice {
            provider_reference: reference,
            event_id,
            status,
            raw: body,
        })
    }

    fn success_ack(&self) -> ProviderAck {
        ProviderAck {
            content_type: "text/plain",
            body: "success",
        }
    }
}

/// Application graph over a fresh database, wired exactly like production
/// except for the stubbed provider and absent Redis.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub stub: Arc<StubProvider>,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("memberly_test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let mut options = ConnectOptions::new(url);
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options).await.expect("sqlite connect");
        Migrator::up(&db, None).await.expect("migrations");
        let db = Arc::new(db);

        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(memberly_api::events::process_events(event_rx));

        let mut config = AppConfig::new(
            "unused".into(),
            "redis://127.0.0.1:6379".into(),
            JWT_SECRET.into(),
            "127.0.0.1".into(),
            18_080,
            "test".into(),
        );
        config.risk.daily_order_cap = 50;
        config.risk.daily_amount_cap = Decimal::from(1_000_000);

        let stub = Arc::new(StubProvider::new(ProviderId::Stripe));
        let mut registry = ProviderRegistry::new();
        registry.register(stub.clone());

        let store = OrderStore::new(db.clone());
        let memberships = Arc::new(MembershipService::new(db.clone(), event_sender.clone()));
        let coupons = Arc::new(CouponService::new(db.clone(), event_sender.clone()));
        let risk = Arc::new(RiskAssessor::new(
            store.clone(),
            config.risk.clone(),
            event_sender.clone(),
        ));
        let vault: Arc<dyn TokenCipher> = Arc::new(
            AesGcmTokenVault::from_base64(&AesGcmTokenVault::generate_key()).unwrap(),
        );
        let renewals = Arc::new(RenewalService::new(
            db.clone(),
            vault,
            memberships.clone(),
            event_sender.clone(),
            config.renewal.reminder_days,
        ));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store,
            Arc::new(registry),
            memberships.clone(),
            coupons.clone(),
            risk,
            renewals.clone(),
            None,
            event_sender.clone(),
            config.order_expiry_minutes,
        ));

        let services = AppServices {
            orchestrator,
            memberships,
            coupons,
            renewals,
        };

        Self {
            db,
            services,
            config,
            event_sender,
            stub,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            event_sender: self.event_sender.clone(),
            services: self.services.clone(),
            redis: None,
        }
    }

    pub async fn seed_plan(&self, price: Decimal, duration_days: i32, level: i32) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let plan = membership_plan::ActiveModel {
            id: Set(id),
            code: Set(format!("plan-{level}-{}", &id.to_string()[..8])),
            name: Set(format!("Tier {level}")),
            price: Set(price),
            duration_days: Set(duration_days),
            level: Set(level),
            status: Set("active".into()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        plan.insert(&*self.db).await.expect("seed plan");
        id
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        kind: &str,
        value: Decimal,
        max_uses_total: i32,
        max_uses_per_user: i32,
    ) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let coupon = coupon::ActiveModel {
            id: Set(id),
            code: Set(code.to_string()),
            kind: Set(kind.to_string()),
            value: Set(value),
            min_order_amount: Set(None),
            applicable_plan_id: Set(None),
            valid_from: Set(now - Duration::days(1)),
            valid_to: Set(now + Duration::days(30)),
            max_uses_total: Set(max_uses_total),
            max_uses_per_user: Set(max_uses_per_user),
            used_count: Set(0),
            status: Set("active".into()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        coupon.insert(&*self.db).await.expect("seed coupon");
        id
    }

    /// Signed webhook delivery for the stub provider.
    pub fn stub_webhook(
        &self,
        reference: &str,
        status: &str,
        event_id: Option<&str>,
    ) -> (Vec<u8>, HeaderMap) {
        let mut body = json!({
            "reference": reference,
            "status": status,
        });
        if let Some(event_id) = event_id {
            body["event_id"] = json!(event_id);
        }
        let payload = serde_json::to_vec(&body).unwrap();
        let signature = hmac_sha256_hex(STUB_WEBHOOK_SECRET, &payload);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-stub-signature",
            HeaderValue::from_str(&signature).unwrap(),
        );
        (payload, headers)
    }

    /// Bearer token for an externally-issued principal.
    pub fn issue_token(&self, user_id: Uuid, admin: bool) -> String {
        use jsonwebtoken::{encode, EncodingKey, Header};
        let claims = memberly_api::auth::Claims {
            sub: user_id.to_string(),
            admin,
            exp: (Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap()
    }
}
