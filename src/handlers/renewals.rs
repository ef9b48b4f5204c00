use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Principal, entities::renewal_subscription::Model as SubscriptionModel,
    errors::ServiceError, providers::ProviderId, ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EnableRenewalRequest {
    pub plan_id: Uuid,
    #[validate(length(min = 1, message = "Provider is required"))]
    pub provider: String,
    /// Reusable payment credential issued by the provider; stored encrypted.
    #[validate(length(min = 1, message = "Payment token is required"))]
    pub payment_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub provider: String,
    pub status: String,
    pub next_renewal_date: DateTime<Utc>,
    pub last_renewal_date: Option<DateTime<Utc>>,
}

impl From<SubscriptionModel> for SubscriptionResponse {
    fn from(model: SubscriptionModel) -> Self {
        Self {
            id: model.id,
            plan_id: model.plan_id,
            provider: model.provider,
            status: model.status,
            next_renewal_date: model.next_renewal_date,
            last_renewal_date: model.last_renewal_date,
        }
    }
}

// POST /api/v1/renewals/enable
#[utoipa::path(
    post,
    path = "/api/v1/renewals/enable",
    request_body = EnableRenewalRequest,
    responses(
        (status = 200, description = "Auto-renewal enabled"),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse)
    ),
    tag = "Renewals"
)]
pub async fn enable_renewal(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<EnableRenewalRequest>,
) -> ApiResult<SubscriptionResponse> {
    request.validate()?;
    let provider = ProviderId::parse(&request.provider)
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let subscription = state
        .services
        .renewals
        .enable(
            principal.user_id,
            request.plan_id,
            provider,
            &request.payment_token,
        )
        .await?;
    Ok(Json(ApiResponse::success(subscription.into())))
}

// POST /api/v1/renewals/disable
#[utoipa::path(
    post,
    path = "/api/v1/renewals/disable",
    responses(
        (status = 200, description = "Auto-renewal disabled"),
        (status = 404, description = "No subscription", body = crate::errors::ErrorResponse)
    ),
    tag = "Renewals"
)]
pub async fn disable_renewal(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<()> {
    state.services.renewals.disable(principal.user_id).await?;
    Ok(Json(ApiResponse::success(())))
}
