use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::{errors::ServiceError, providers::ProviderId, AppState};

// POST /api/v1/webhooks/:provider
//
// No bearer auth on this surface; the adapter's signature verification is
// the gate. The response body must match what each network expects as an
// ack, including for absorbed stale/duplicate deliveries.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/{provider}",
    params(("provider" = String, Path, description = "alipay | wechat | unionpay | stripe")),
    request_body = String,
    responses(
        (status = 200, description = "Notification accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown provider", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = match ProviderId::parse(&provider) {
        Ok(provider) => provider,
        Err(_) => {
            return ServiceError::NotFound(format!("unknown provider: {provider}")).into_response()
        }
    };

    match state
        .services
        .orchestrator
        .handle_webhook(provider, &body, &headers)
        .await
    {
        Ok(outcome) => {
            info!(provider = %provider, outcome = ?outcome, "webhook processed");
            match state.services.orchestrator.webhook_ack(provider) {
                Ok(ack) => (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, ack.content_type)],
                    ack.body,
                )
                    .into_response(),
                Err(err) => err.into_response(),
            }
        }
        Err(err) => {
            warn!(provider = %provider, error = %err, "webhook rejected");
            err.into_response()
        }
    }
}
