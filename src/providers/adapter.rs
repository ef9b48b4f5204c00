use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::Decimal;

use crate::providers::error::ProviderResult;
use crate::providers::types::{
    NormalizedStatus, ProviderAck, ProviderId, ProviderOrder, ProviderOrderSpec, RefundReference,
    WebhookNotice,
};

/// One payment network behind the generic order contract.
///
/// Implementations hold only configuration and an HTTP client; they carry no
/// per-order state and are safe to invoke concurrently for unrelated orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Register an order with the network; returns the provider's reference
    /// and the redirect/QR payload the client needs to complete payment.
    async fn create_order(&self, spec: &ProviderOrderSpec) -> ProviderResult<ProviderOrder>;

    /// Poll the authoritative status of a registered order.
    async fn query_status(&self, provider_reference: &str) -> ProviderResult<NormalizedStatus>;

    async fn refund(
        &self,
        provider_reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> ProviderResult<RefundReference>;

    /// Close an unpaid order at the network so it can no longer be paid.
    async fn close(&self, provider_reference: &str) -> ProviderResult<()>;

    /// Verify the webhook signature and normalize the notification.
    /// Signature failure never reaches order state.
    fn verify_and_parse_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> ProviderResult<WebhookNotice>;

    /// Provider-specific body acknowledging successful receipt.
    fn success_ack(&self) -> ProviderAck;
}
