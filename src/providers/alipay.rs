//! Alipay wallet adapter: QR-code collection flow, form-style notifications
//! signed over a canonically sorted parameter string.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use http::HeaderMap;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::ProviderSettings;
use crate::providers::adapter::ProviderAdapter;
use crate::providers::client::ProviderHttpClient;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::signature::{constant_time_eq, hmac_sha256_hex};
use crate::providers::types::{
    NormalizedStatus, ProviderAck, ProviderId, ProviderOrder, ProviderOrderSpec, RedirectPayload,
    RefundReference, WebhookNotice,
};

const DEFAULT_BASE_URL: &str = "https://openapi.alipay.com";

pub struct AlipayAdapter {
    settings: ProviderSettings,
    http: ProviderHttpClient,
    #[allow(dead_code)]
    tolerance_secs: u64,
}

impl AlipayAdapter {
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

/// Map the trade-status vocabulary into the normalized enum. `TRADE_CLOSED`
/// doubles as the terminal state after a full refund; the notification then
/// carries a `refund_fee` field.
pub(crate) fn map_trade_status(
    trade_status: &str,
    refunded: bool,
) -> ProviderResult<NormalizedStatus> {
    match trade_status {
        "WAIT_BUYER_PAY" => Ok(NormalizedStatus::Pending),
        "TRADE_SUCCESS" | "TRADE_FINISHED" => Ok(NormalizedStatus::Paid),
        "TRADE_CLOSED" => {
            if refunded {
                Ok(NormalizedStatus::Refunded)
            } else {
                Ok(NormalizedStatus::Closed)
            }
        }
        other => Err(ProviderError::InvalidPayload(format!(
            "unknown trade_status: {other}"
        ))),
    }
}

/// Canonical signing base: every field except `sign`, sorted by key,
/// joined as `k=v` pairs with `&`.
pub(crate) fn signing_base(body: &Value) -> ProviderResult<String> {
    let map = body
        .as_object()
        .ok_or_else(|| ProviderError::InvalidPayload("notification is not an object".into()))?;

    let mut keys: Vec<&String> = map.keys().filter(|k| k.as_str() != "sign").collect();
    keys.sort();

    let parts: Vec<String> = keys
        .into_iter()
        .map(|k| {
            let v = &map[k];
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{k}={rendered}")
        })
        .collect();
    Ok(parts.join("&"))
}

#[derive(Debug, Deserialize)]
struct PrecreateResponse {
    trade_no: String,
    qr_code: String,
}

#[derive(Debug, Deserialize)]
struct TradeQueryResponse {
    trade_status: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    out_request_no: String,
}

#[async_trait]
impl ProviderAdapter for AlipayAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Alipay
    }

    async fn create_order(&self, spec: &ProviderOrderSpec) -> ProviderResult<ProviderOrder> {
        let expires_at = Utc::now() + Duration::minutes(spec.expires_in_minutes);
        let payload = json!({
            "app_id": self.settings.merchant_id,
            "out_trade_no": spec.order_id.to_string(),
            "total_amount": spec.amount.to_string(),
            "subject": spec.subject,
            "timeout_express": format!("{}m", spec.expires_in_minutes),
        });

        let resp: PrecreateResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v3/alipay/trade/precreate"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;

        info!(trade_no = %resp.trade_no, "alipay order registered");
        Ok(ProviderOrder {
            provider_reference: resp.trade_no,
            redirect: RedirectPayload::QrCode(resp.qr_code),
            expires_at,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> ProviderResult<NormalizedStatus> {
        let payload = json!({ "trade_no": provider_reference });
        let resp: TradeQueryResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v3/alipay/trade/query"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        map_trade_status(&resp.trade_status, false)
    }

    async fn refund(
        &self,
        provider_reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> ProviderResult<RefundReference> {
        let payload = json!({
            "trade_no": provider_reference,
            "refund_amount": amount.to_string(),
            "refund_reason": reason,
        });
        let resp: RefundResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v3/alipay/trade/refund"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        Ok(RefundReference(resp.out_request_no))
    }

    async fn close(&self, provider_reference: &str) -> ProviderResult<()> {
        let payload = json!({ "trade_no": provider_reference });
        let _: Value = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/v3/alipay/trade/close"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        Ok(())
    }

    fn verify_and_parse_webhook(
        &self,
        payload: &[u8],
        _headers: &HeaderMap,
    ) -> ProviderResult<WebhookNotice> {
        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::InvalidPayload(format!("notification decode: {e}")))?;

        let sign = body
            .get("sign")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing sign field".into()))?;

        let base = signing_base(&body)?;
        let expected = hmac_sha256_hex(&self.settings.webhook_secret, base.as_bytes());
        if !constant_time_eq(&expected, sign) {
            return Err(ProviderError::InvalidSignature);
        }

        let trade_no = body
            .get("trade_no")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing trade_no".into()))?
            .to_string();
        let trade_status = body
            .get("trade_status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing trade_status".into()))?;
        let refunded = body.get("refund_fee").is_some();
        let status = map_trade_status(trade_status, refunded)?;
        let event_id = body
            .get("notify_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(WebhookNotice {
            provider_reference: trade_no,
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
