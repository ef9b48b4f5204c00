//! UnionPay card-rail adapter: hosted gateway redirect flow, numeric
//! response-code vocabulary, detached HMAC signature headers.

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
use crate::providers::signature::{constant_time_eq, hmac_sha256_hex, timestamp_within_tolerance};
use crate::providers::types::{
    NormalizedStatus, ProviderAck, ProviderId, ProviderOrder, ProviderOrderSpec, RedirectPayload,
    RefundReference, WebhookNotice,
};

const DEFAULT_BASE_URL: &str = "https://gateway.unionpay.example";

/// Transaction types carried in notifications.
const TXN_PURCHASE: &str = "01";
const TXN_REFUND: &str = "04";
const TXN_CANCEL: &str = "31";

pub struct UnionpayAdapter {
    settings: ProviderSettings,
    http: ProviderHttpClient,
    tolerance_secs: u64,
}

impl UnionpayAdapter {
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

/// respCode + txnType → normalized status. `00` means the named transaction
/// completed; `03/04/05` mean still in flight at the switch.
pub(crate) fn map_resp_code(resp_code: &str, txn_type: &str) -> ProviderResult<NormalizedStatus> {
    match resp_code {
        "00" => match txn_type {
            TXN_PURCHASE => Ok(NormalizedStatus::Paid),
            TXN_REFUND => Ok(NormalizedStatus::Refunded),
            TXN_CANCEL => Ok(NormalizedStatus::Cancelled),
            other => Err(ProviderError::InvalidPayload(format!(
                "unknown txnType: {other}"
            ))),
        },
        "01" => Ok(NormalizedStatus::Pending),
        "03" | "04" | "05" => Ok(NormalizedStatus::Processing),
        "12" => Ok(NormalizedStatus::Closed),
        "11" | "38" | "61" => Ok(NormalizedStatus::Failed),
        other => Err(ProviderError::InvalidPayload(format!(
            "unknown respCode: {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    tn: String,
    #[serde(rename = "frontUrl")]
    front_url: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQueryResponse {
    #[serde(rename = "respCode")]
    resp_code: String,
    #[serde(rename = "txnType")]
    txn_type: String,
}

#[derive(Debug, Deserialize)]
struct GatewayRefundResponse {
    #[serde(rename = "queryId")]
    query_id: String,
}

#[async_trait]
impl ProviderAdapter for UnionpayAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Unionpay
    }

    async fn create_order(&self, spec: &ProviderOrderSpec) -> ProviderResult<ProviderOrder> {
        let expires_at = Utc::now() + Duration::minutes(spec.expires_in_minutes);
        let payload = json!({
            "merId": self.settings.merchant_id,
            "orderId": spec.order_id.to_string(),
            "txnAmt": (spec.amount * Decimal::from(100)).round().to_string(),
            "txnType": TXN_PURCHASE,
            "orderDesc": spec.subject,
            "payTimeout": expires_at.to_rfc3339(),
        });

        let resp: GatewayOrderResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/gateway/api/order"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;

        info!(tn = %resp.tn, "unionpay order registered");
        Ok(ProviderOrder {
            provider_reference: resp.tn,
            redirect: RedirectPayload::Url(resp.front_url),
            expires_at,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> ProviderResult<NormalizedStatus> {
        let payload = json!({
            "merId": self.settings.merchant_id,
            "tn": provider_reference,
        });
        let resp: GatewayQueryResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/gateway/api/query"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        map_resp_code(&resp.resp_code, &resp.txn_type)
    }

    async fn refund(
        &self,
        provider_reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> ProviderResult<RefundReference> {
        let payload = json!({
            "merId": self.settings.merchant_id,
            "origTn": provider_reference,
            "txnAmt": (amount * Decimal::from(100)).round().to_string(),
            "txnType": TXN_REFUND,
            "reqReserved": reason,
        });
        let resp: GatewayRefundResponse = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/gateway/api/refund"),
                Some(&self.settings.api_secret),
                Some(&payload),
            )
            .await?;
        Ok(RefundReference(resp.query_id))
    }

    async fn close(&self, provider_reference: &str) -> ProviderResult<()> {
        let payload = json!({
            "merId": self.settings.merchant_id,
            "origTn": provider_reference,
            "txnType": TXN_CANCEL,
        });
        let _: Value = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/gateway/api/cancel"),
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
            .get("X-Unionpay-Timestamp")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing timestamp header".into()))?;
        let signature = headers
            .get("X-Unionpay-Signature")
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
        let message = format!("{timestamp}.{body_str}");
        let expected = hmac_sha256_hex(&self.settings.webhook_secret, message.as_bytes());
        if !constant_time_eq(&expected, signature) {
            return Err(ProviderError::InvalidSignature);
        }

        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::InvalidPayload(format!("notification decode: {e}")))?;

        let tn = body
            .get("tn")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing tn".into()))?
            .to_string();
        let resp_code = body
            .get("respCode")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing respCode".into()))?;
        let txn_type = body
            .get("txnType")
            .and_then(|v| v.as_str())
            .unwrap_or(TXN_PURCHASE);
        let status = map_resp_code(resp_code, txn_type)?;
        let event_id = body
            .get("queryId")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(WebhookNotice {
            provider_reference: tn,
            event_id,
            status,
            raw: body,
        })
    }

    fn success_ack(&self) -> ProviderAck {
        ProviderAck {
            content_type: "text/plain",
            body: "ok",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    const WEBHOOK_SECRET: &str = "unionpay_webhook_secret";

    fn adapter() -> UnionpayAdapter {
        UnionpayAdapter::new(
            ProviderSettings {
                enabled: true,
                merchant_id: "898000000000001".into(),
                api_secret: "unionpay_api_secret".into(),
                webhook_secret: WEBHOOK_SECRET.into(),
                base_url: None,
            },
            300,
        )
        .unwrap()
    }

    fn signed_headers(body: &[u8], secret: &str) -> HeaderMap {
        let ts = Utc::now().timestamp();
        let message = format!("{ts}.{}", std::str::from_utf8(body).unwrap());
        let sig = hmac_sha256_hex(secret, message.as_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Unionpay-Timestamp",
            HeaderValue::from_str(&ts.to_string()).unwrap(),
        );
        headers.insert(
            "X-Unionpay-Signature",
            HeaderValue::from_str(&sig).unwrap(),
        );
        headers
    }

    #[test]
    fn resp_code_mapping_covers_the_vocabulary() {
        assert_eq!(map_resp_code("00", "01").unwrap(), NormalizedStatus::Paid);
        assert_eq!(
            map_resp_code("00", "04").unwrap(),
            NormalizedStatus::Refunded
        );
        assert_eq!(
            map_resp_code("00", "31").unwrap(),
            NormalizedStatus::Cancelled
        );
        assert_eq!(map_resp_code("01", "01").unwrap(), NormalizedStatus::Pending);
        for in_flight in ["03", "04", "05"] {
            assert_eq!(
                map_resp_code(in_flight, "01").unwrap(),
                NormalizedStatus::Processing
            );
        }
        assert_eq!(map_resp_code("12", "01").unwrap(), NormalizedStatus::Closed);
        for failed in ["11", "38", "61"] {
            assert_eq!(
                map_resp_code(failed, "01").unwrap(),
                NormalizedStatus::Failed
            );
        }
        assert!(map_resp_code("99", "01").is_err());
        assert!(map_resp_code("00", "77").is_err());
    }

    #[test]
    fn valid_notification_is_accepted() {
        let adapter = adapter();
        let body = serde_json::to_vec(&json!({
            "queryId": "Q202403010001",
            "tn": "201603085500",
            "respCode": "00",
            "txnType": "01",
        }))
        .unwrap();
        let headers = signed_headers(&body, WEBHOOK_SECRET);
        let notice = adapter.verify_and_parse_webhook(&body, &headers).unwrap();
        assert_eq!(notice.provider_reference, "201603085500");
        assert_eq!(notice.status, NormalizedStatus::Paid);
        assert_eq!(notice.event_id.as_deref(), Some("Q202403010001"));
    }

    #[test]
    fn refund_notification_normalizes_to_refunded() {
        let adapter = adapter();
        let body = serde_json::to_vec(&json!({
            "tn": "201603085500",
            "respCode": "00",
            "txnType": "04",
        }))
        .unwrap();
        let headers = signed_headers(&body, WEBHOOK_SECRET);
        let notice = adapter.verify_and_parse_webhook(&body, &headers).unwrap();
        assert_eq!(notice.status, NormalizedStatus::Refunded);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let adapter = adapter();
        let body = serde_json::to_vec(&json!({
            "tn": "201603085500",
            "respCode": "00",
            "txnType": "01",
        }))
        .unwrap();
        let headers = signed_headers(&body, "wrong_secret");
        assert!(matches!(
            adapter.verify_and_parse_webhook(&body, &headers),
            Err(ProviderError::InvalidSignature)
        ));
    }
}
