pub mod health;
pub mod memberships;
pub mod orders;
pub mod renewals;
pub mod webhooks;

use std::sync::Arc;

use tracing::warn;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    providers::ProviderRegistry,
    services::coupons::CouponService,
    services::memberships::MembershipService,
    services::orchestrator::PaymentOrchestrator,
    services::orders::OrderStore,
    services::renewals::RenewalService,
    services::risk::RiskAssessor,
    services::token_vault::{AesGcmTokenVault, TokenCipher},
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Business services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub memberships: Arc<MembershipService>,
    pub coupons: Arc<CouponService>,
    pub renewals: Arc<RenewalService>,
}

impl AppServices {
    /// Wire the full service graph from configuration.
    pub fn new(
        db: Arc<DbPool>,
        cfg: &AppConfig,
        event_sender: EventSender,
        redis: Option<Arc<redis::Client>>,
    ) -> Result<Self, ServiceError> {
        let registry = Arc::new(ProviderRegistry::from_config(cfg)?);

        let store = OrderStore::new(db.clone());
        let memberships = Arc::new(MembershipService::new(db.clone(), event_sender.clone()));
        let coupons = Arc::new(CouponService::new(db.clone(), event_sender.clone()));
        let risk = Arc::new(RiskAssessor::new(
            store.clone(),
            cfg.risk.clone(),
            event_sender.clone(),
        ));

        let vault: Arc<dyn TokenCipher> = if cfg.vault_master_key.is_empty() {
            // Stored renewal tokens will not survive a restart without a
            // configured key; acceptable for development, loud about it.
            warn!("vault master key not configured; using an ephemeral key");
            Arc::new(
                AesGcmTokenVault::from_base64(&AesGcmTokenVault::generate_key())
                    .expect("freshly generated key is always valid"),
            )
        } else {
            Arc::new(AesGcmTokenVault::from_base64(&cfg.vault_master_key)?)
        };

        let renewals = Arc::new(RenewalService::new(
            db,
            vault,
            memberships.clone(),
            event_sender.clone(),
            cfg.renewal.reminder_days,
        ));

        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store,
            registry,
            memberships.clone(),
            coupons.clone(),
            risk,
            renewals.clone(),
            redis,
            event_sender,
            cfg.order_expiry_minutes,
        ));

        Ok(Self {
            orchestrator,
            memberships,
            coupons,
            renewals,
        })
    }
}
