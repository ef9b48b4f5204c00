//! Stripe adapter: payment-intent flow for the global card network,
//! `Stripe-Signature: t=…,v1=…` webhook scheme with timestamp tolerance.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use http::HeaderMap;
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::ProviderSettings;
use crate::providers::adapter::ProviderAdapter;
use crate::providers::client::ProviderHttpClient;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::signature::{constant_time_eq, hmac_sha256_hex, timestamp_within_tolerance};
use crate::providers::types::{
    NormalizedStatus, ProviderAck, ProviderId, ProviderOrder, ProviderOrderSpec, RedirectPayload,
    RefundReference, WebhookNotice,
};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

pub struct StripeAdapter {
    settings: ProviderSettings,
    http: ProviderHttpClient,
    tolerance_secs: u64,
}

impl StripeAdapter {
    pub fn new(settings: ProviderSettings, tolerance_secs: u64) -> ProviderResult<Self> {
        Ok(Self {
            settings,
            http: ProviderHttpClient::with_default_timeout()?,
            tolerance_secs,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        format!("{base}{path}")
    }
}

/// Payment-intent status → normalized status (used by the polling path).
pub(crate) fn map_intent_status(status: &str) -> ProviderResult<NormalizedStatus> {
    match status {
        "requires_payment_method" | "requires_confirmation" | "requires_action" => {
            Ok(NormalizedStatus::Pending)
        }
        "processing" => Ok(NormalizedStatus::Processing),
        "succeeded" => Ok(NormalizedStatus::Paid),
        "canceled" => Ok(NormalizedStatus::Cancelled),
        other => Err(ProviderError::InvalidPayload(format!(
            "unknown intent status: {other}"
        ))),
    }
}

/// Webhook event type → normalized status. Event types outside the payment
/// lifecycle are `Unsupported`: the caller acks and skips them.
pub(crate) fn map_event_type(event_type: &str) -> ProviderResult<NormalizedStatus> {
    match event_type {
        "payment_intent.created" => Ok(NormalizedStatus::Pending),
        "payment_intent.processing" => Ok(NormalizedStatus::Processing),
        "payment_intent.succeeded" => Ok(NormalizedStatus::Paid),
        "payment_intent.payment_failed" => Ok(NormalizedStatus::Failed),
        "payment_intent.canceled" => Ok(NormalizedStatus::Cancelled),
        "charge.refunded" => Ok(NormalizedStatus::Refunded),
        other => Err(ProviderError::Unsupported(format!(
            "ignored event type: {other}"
        ))),
    }
}

/// Parse `Stripe-Signature: t=<ts>,v1=<sig>[,v1=…]`.
pub(crate) fn parse_signature_header(header: &str) -> Option<(i64, Vec<&str>)> {
    let mut ts: Option<i64> = None;
    let mut sigs = Vec::new();
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(value)) => ts = value.parse().ok(),
            (Some("v1"), Some(value)) => sigs.push(value),
            _ => {}
        }
    }
    ts.map(|t| (t, sigs))
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Stripe
    }

    async fn create_order(&self, spec: &ProviderOrderSpec) -> ProviderResult<ProviderOrder> {
        let expires_at = Utc::now() + Duration::minutes(spec.expires_in_minutes);
        let amount_minor = (spec.amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| {
                ProviderError::InvalidPayload(format!("amount out of range: {}", spec.amount))
            })?;

        let mut payload = json!({
            "amount": amount_minor,
            "currency": spec.currency.to_lowercase(),
            "description": spec.subject,
            "metadata": { "order_id": spec.order_id.to_string() },
        });
        // Off-session renewal charges confirm immediately with the stored
        // payment method; interactive orders go through the hosted page.
        if let Some(token) = &spec.off_session_token {
            let obj = payload.as_object_mut().expect("payload is an object");
            obj.insert("payment_method".into(), json!(token));
            obj.insert("confirm".into(), json!(true));
            obj.insert("off_session".into(), json!(true));
        }

        let resp: PaymentIntentResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v1/payment_intents"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;

        info!(intent = %resp.id, status = %resp.status, "stripe intent created");
        Ok(ProviderOrder {
            provider_reference: resp.id,
            redirect: RedirectPayload::Url(format!(
                "https://checkout.stripe.com/pay/{}",
                resp.client_secret
            )),
            expires_at,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> ProviderResult<NormalizedStatus> {
        let resp: PaymentIntentResponse = self
            .http
            .request_json::<Value, _>(
                Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{provider_reference}")),
                Some(&self.settings.api_secret),
                None,
            )
            .await?;
        map_intent_status(&resp.status)
    }

    async fn refund(
        &self,
        provider_reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> ProviderResult<RefundReference> {
        let amount_minor = (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| {
                ProviderError::InvalidPayload(format!("amount out of range: {amount}"))
            })?;
        let payload = json!({
            "payment_intent": provider_reference,
            "amount": amount_minor,
            "metadata": { "reason": reason },
        });
        let resp: RefundResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v1/refunds"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        Ok(RefundReference(resp.id))
    }

    async fn close(&self, provider_reference: &str) -> ProviderResult<()> {
        let _: Value = self
            .http
            .request_json::<Value, _>(
                Method::POST,
                &self.endpoint(&format!("/v1/payment_intents/{provider_reference}/cancel")),
                Some(&self.settings.api_secret),
                None,
            )
            .await?;
        Ok(())
    }

    fn verify_and_parse_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> ProviderResult<WebhookNotice> {
        let header = headers
            .get("Stripe-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing signature header".into()))?;

        let (ts, candidates) = parse_signature_header(header)
            .ok_or_else(|| ProviderError::InvalidPayload("malformed signature header".into()))?;
        if candidates.is_empty() {
            return Err(ProviderError::InvalidPayload(
                "signature header carries no v1 entries".into(),
            ));
        }
        if !timestamp_within_tolerance(ts, self.tolerance_secs) {
            return Err(ProviderError::InvalidSignature);
        }

        let body_str = std::str::from_utf8(payload)
            .map_err(|_| ProviderError::InvalidPayload("body is not utf-8".into()))?;
        let message = format!("{ts}.{body_str}");
        let expected = hmac_sha256_hex(&self.settings.webhook_secret, message.as_bytes());
        if !candidates.iter().any(|sig| constant_time_eq(&expected, sig)) {
            return Err(ProviderError::InvalidSignature);
        }

        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::InvalidPayload(format!("event decode: {e}")))?;

        let event_type = body
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing event type".into()))?;
        let status = map_event_type(event_type)?;

        // For charge events the intent reference sits on the object itself.
        let object = body
            .pointer("/data/object")
            .ok_or_else(|| ProviderError::InvalidPayload("missing data.object".into()))?;
        let reference = object
            .get("payment_intent")
            .or_else(|| object.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing intent reference".into()))?
            .to_string();
        let event_id = body.get("id").and_then(|v| v.as_str()).map(str::to_string);

        Ok(WebhookNotice {
            provider_reference: reference,
            event_id,
            status,
            raw: body,
        })
    }

    fn success_ack(&self) -> ProviderAck {
        ProviderAck {
            content_type: "application/json",
            body: r#"{"received":true}"#,
        }
    }
}
