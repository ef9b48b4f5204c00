//! WeChat Pay adapter: native (QR) collection flow, notifications signed over
//! `timestamp\nnonce\nbody\n` carried in `Wechatpay-*` headers.

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

const DEFAULT_BASE_URL: &str = "https://api.mch.weixin.qq.com";

pub struct WechatAdapter {
    settings: ProviderSettings,
    http: ProviderHttpClient,
    tolerance_secs: u64,
}

impl WechatAdapter {
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

/// trade_state → normalized status. Every state the network documents must
/// appear here; an unknown state is a payload error, not a silent default.
pub(crate) fn map_trade_state(state: &str) -> ProviderResult<NormalizedStatus> {
    match state {
        "NOTPAY" => Ok(NormalizedStatus::Pending),
        "USERPAYING" => Ok(NormalizedStatus::Processing),
        "SUCCESS" => Ok(NormalizedStatus::Paid),
        "PAYERROR" => Ok(NormalizedStatus::Failed),
        "REVOKED" => Ok(NormalizedStatus::Cancelled),
        "CLOSED" => Ok(NormalizedStatus::Closed),
        "REFUND" => Ok(NormalizedStatus::Refunded),
        other => Err(ProviderError::InvalidPayload(format!(
            "unknown trade_state: {other}"
        ))),
    }
}

/// Amount in minor units (fen), as the network expects.
fn minor_units(amount: Decimal) -> ProviderResult<i64> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ProviderError::InvalidPayload(format!("amount out of range: {amount}")))
}

#[derive(Debug, Deserialize)]
struct NativeCreateResponse {
    prepay_id: String,
    code_url: String,
}

#[derive(Debug, Deserialize)]
struct TransactionQueryResponse {
    trade_state: String,
}

#[derive(Debug, Deserialize)]
struct RefundCreateResponse {
    refund_id: String,
}

#[async_trait]
impl ProviderAdapter for WechatAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Wechat
    }

    async fn create_order(&self, spec: &ProviderOrderSpec) -> ProviderResult<ProviderOrder> {
        let expires_at = Utc::now() + Duration::minutes(spec.expires_in_minutes);
        let payload = json!({
            "mchid": self.settings.merchant_id,
            "out_trade_no": spec.order_id.to_string(),
            "description": spec.subject,
            "time_expire": expires_at.to_rfc3339(),
            "amount": {
                "total": minor_units(spec.amount)?,
                "currency": spec.currency,
            },
        });

        let resp: NativeCreateResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v3/pay/transactions/native"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;

        info!(prepay_id = %resp.prepay_id, "wechat order registered");
        Ok(ProviderOrder {
            provider_reference: resp.prepay_id,
            redirect: RedirectPayload::QrCode(resp.code_url),
            expires_at,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> ProviderResult<NormalizedStatus> {
        let url = format!(
            "{}?mchid={}",
            self.endpoint(&format!("/v3/pay/transactions/id/{provider_reference}")),
            self.settings.merchant_id
        );
        let resp: TransactionQueryResponse = self
            .http
            .request_json::<Value, _>(Method::GET, &url, Some(&self.settings.api_secret), None)
            .await?;
        map_trade_state(&resp.trade_state)
    }

    async fn refund(
        &self,
        provider_reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> ProviderResult<RefundReference> {
        let payload = json!({
            "transaction_id": provider_reference,
            "reason": reason,
            "amount": { "refund": minor_units(amount)? },
        });
        let resp: RefundCreateResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v3/refund/domestic/refunds"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        Ok(RefundReference(resp.refund_id))
    }

    async fn close(&self, provider_reference: &str) -> ProviderResult<()> {
        let payload = json!({ "mchid": self.settings.merchant_id });
        let _: Value = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint(&format!(
                    "/v3/pay/transactions/out-trade-no/{provider_reference}/close"
                )),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        Ok(())
    }

    fn verify_and_parse_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> ProviderResult<WebhookNotice> {
        let timestamp = headers
            .get("Wechatpay-Timestamp")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing timestamp header".into()))?;
        let nonce = headers
            .get("Wechatpay-Nonce")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing nonce header".into()))?;
        let signature = headers
            .get("Wechatpay-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing signature header".into()))?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| ProviderError::InvalidPayload("bad timestamp header".into()))?;
        if !timestamp_within_tolerance(ts, self.tolerance_secs) {
            return Err(ProviderError::InvalidSignature);
        }

        let body_str = std::str::from_utf8(payload)
            .map_err(|_| ProviderError::InvalidPayload("body is not utf-8".into()))?;
        let message = format!("{timestamp}\n{nonce}\n{body_str}\n");
        let expected = hmac_sha256_hex(&self.settings.webhook_secret, message.as_bytes());
        if !constant_time_eq(&expected, signature) {
            return Err(ProviderError::InvalidSignature);
        }

        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::InvalidPayload(format!("notification decode: {e}")))?;
        let resource = body
            .get("resource")
            .ok_or_else(|| ProviderError::InvalidPayload("missing resource".into()))?;

        let prepay_id = resource
            .get("prepay_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing resource.prepay_id".into()))?
            .to_string();
        let trade_state = resource
            .get("trade_state")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing resource.trade_state".into()))?;
        let status = map_trade_state(trade_state)?;
        let event_id = body.get("id").and_then(|v| v.as_str()).map(str::to_string);

        Ok(WebhookNotice {
            provider_reference: prepay_id,
            event_id,
            status,
            raw: body,
        })
    }

    fn success_ack(&self) -> ProviderAck {
        ProviderAck {
            content_type: "application/json",
            body: r#"{"code":"SUCCESS","message":"OK"}"#,
        }
    }
}
