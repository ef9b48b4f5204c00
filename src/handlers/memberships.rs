use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Principal, entities::membership::Model as MembershipModel, errors::ServiceError,
    services::memberships::ChangeQuote, ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct MembershipResponse {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub auto_renewal: bool,
    pub status: String,
}

impl From<MembershipModel> for MembershipResponse {
    fn from(model: MembershipModel) -> Self {
        Self {
            user_id: model.user_id,
            plan_id: model.plan_id,
            start_date: model.start_date,
            expiry_date: model.expiry_date,
            auto_renewal: model.auto_renewal,
            status: model.status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePriceQuery {
    pub target_plan_id: Uuid,
}

// GET /api/v1/memberships/me
#[utoipa::path(
    get,
    path = "/api/v1/memberships/me",
    responses(
        (status = 200, description = "The caller's membership"),
        (status = 404, description = "No membership", body = crate::errors::ErrorResponse)
    ),
    tag = "Memberships"
)]
pub async fn get_my_membership(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<MembershipResponse> {
    let membership = state
        .services
        .memberships
        .get(principal.user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("no membership for this account".into()))?;
    Ok(Json(ApiResponse::success(membership.into())))
}

// GET /api/v1/memberships/change-price?target_plan_id=...
#[utoipa::path(
    get,
    path = "/api/v1/memberships/change-price",
    params(("target_plan_id" = Uuid, Query, description = "Plan to switch to")),
    responses(
        (status = 200, description = "Prorated quote for the plan change"),
        (status = 400, description = "Invalid target plan", body = crate::errors::ErrorResponse)
    ),
    tag = "Memberships"
)]
pub async fn change_price(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ChangePriceQuery>,
) -> ApiResult<ChangeQuote> {
    let quote = state
        .services
        .memberships
        .compute_change_price(principal.user_id, query.target_plan_id)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}
