use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::providers::error::ProviderError;

/// The payment networks this system talks to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Alipay,
    Wechat,
    Unionpay,
    Stripe,
}

impl ProviderId {
    pub fn parse(value: &str) -> Result<Self, ProviderError> {
        Self::from_str(value.trim().to_lowercase().as_str())
            .map_err(|_| ProviderError::Unsupported(format!("unknown provider: {value}")))
    }
}

/// Provider-agnostic status vocabulary every adapter maps into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NormalizedStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Closed,
    Refunded,
}

/// What the orchestrator asks a provider to register.
#[derive(Debug, Clone)]
pub struct ProviderOrderSpec {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub subject: String,
    /// Stored payment credential for off-session renewal charges.
    pub off_session_token: Option<String>,
    pub expires_in_minutes: i64,
}

/// Payload handed back to the client to complete payment.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RedirectPayload {
    Url(String),
    QrCode(String),
}

/// A successfully registered provider order.
#[derive(Debug, Clone)]
pub struct ProviderOrder {
    pub provider_reference: String,
    pub redirect: RedirectPayload,
    pub expires_at: DateTime<Utc>,
}

/// Verified, parsed webhook notification.
#[derive(Debug, Clone)]
pub struct WebhookNotice {
    pub provider_reference: String,
    /// Provider event id, when the network sends one; used for replay dedup.
    pub event_id: Option<String>,
    pub status: NormalizedStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RefundReference(pub String);

/// The body a provider expects as a successful webhook acknowledgment.
#[derive(Debug, Clone, Copy)]
pub struct ProviderAck {
    pub content_type: &'static str,
    pub body: &'static str,
}
