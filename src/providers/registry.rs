use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::providers::adapter::ProviderAdapter;
use crate::providers::types::ProviderId;
use crate::providers::{alipay, stripe, unionpay, wechat};

/// Adapter lookup keyed by provider id, built once from config at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Build the registry with every enabled provider from configuration.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let mut registry = Self::new();

        if cfg.alipay.enabled {
            registry.register(Arc::new(
                alipay::AlipayAdapter::new(cfg.alipay.clone(), cfg.webhook_tolerance_secs)
                    .map_err(|e| e.into_service_error())?,
            ));
        }
        if cfg.wechat.enabled {
            registry.register(Arc::new(
                wechat::WechatAdapter::new(cfg.wechat.clone(), cfg.webhook_tolerance_secs)
                    .map_err(|e| e.into_service_error())?,
            ));
        }
        if cfg.unionpay.enabled {
            registry.register(Arc::new(
                unionpay::UnionpayAdapter::new(cfg.unionpay.clone(), cfg.webhook_tolerance_secs)
                    .map_err(|e| e.into_service_error())?,
            ));
        }
        if cfg.stripe.enabled {
            registry.register(Arc::new(
                stripe::StripeAdapter::new(cfg.stripe.clone(), cfg.webhook_tolerance_secs)
                    .map_err(|e| e.into_service_error())?,
            ));
        }

        info!(
            providers = ?registry.available(),
            "payment provider registry initialized"
        );
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn get(&self, id: ProviderId) -> Result<Arc<dyn ProviderAdapter>, ServiceError> {
        self.adapters.get(&id).cloned().ok_or_else(|| {
            ServiceError::ValidationError(format!("payment provider {id} is not enabled"))
        })
    }

    pub fn available(&self) -> Vec<ProviderId> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "redis://127.0.0.1:6379".into(),
            "test_secret_key_for_testing_purposes_only_32chars".into(),
            "127.0.0.1".into(),
            18_080,
            "test".into(),
        )
    }

    #[test]
    fn disabled_providers_are_not_registered() {
        let cfg = base_config();
        let registry = ProviderRegistry::from_config(&cfg).unwrap();
        assert!(registry.available().is_empty());
        assert!(registry.get(ProviderId::Alipay).is_err());
    }

    #[test]
    fn enabled_providers_resolve() {
        let mut cfg = base_config();
        cfg.stripe.enabled = true;
        cfg.stripe.api_secret = "sk_test_123".into();
        cfg.stripe.webhook_secret = "whsec_123".into();
        let registry = ProviderRegistry::from_config(&cfg).unwrap();
        assert!(registry.get(ProviderId::Stripe).is_ok());
        assert!(registry.get(ProviderId::Wechat).is_err());
    }
}
