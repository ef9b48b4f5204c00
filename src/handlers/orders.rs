use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Principal,
    entities::payment_order::Model as OrderModel,
    errors::ServiceError,
    providers::ProviderId,
    services::orchestrator::{CreateOrderCommand, OrderCreated},
    services::risk::RequestContext,
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub plan_id: Uuid,
    /// Payment network key: alipay | wechat | unionpay | stripe
    #[validate(length(min = 1, message = "Provider is required"))]
    pub provider: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefundRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500, message = "Reason is required"))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Poll the provider when the stored status is not terminal.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub provider: String,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub coupon_id: Option<Uuid>,
    pub status: String,
    pub redirect_payload: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderModel> for OrderResponse {
    fn from(model: OrderModel) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            plan_id: model.plan_id,
            provider: model.provider,
            original_amount: model.original_amount,
            discount_amount: model.discount_amount,
            final_amount: model.final_amount,
            coupon_id: model.coupon_id,
            status: model.status,
            redirect_payload: model.redirect_payload,
            paid_at: model.paid_at,
            refunded_at: model.refunded_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

fn client_context(headers: &HeaderMap) -> RequestContext {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|ip| ip.trim().to_string());
    RequestContext { ip }
}

// POST /api/v1/orders
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created, redirect payload returned"),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 403, description = "Refused by risk policy", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<OrderCreated> {
    request.validate()?;
    let provider = ProviderId::parse(&request.provider)
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let created = state
        .services
        .orchestrator
        .create_order(CreateOrderCommand {
            user_id: principal.user_id,
            plan_id: request.plan_id,
            provider,
            coupon_code: request.coupon_code,
            ctx: client_context(&headers),
            renewal_subscription_id: None,
            off_session_token: None,
        })
        .await?;

    Ok(Json(ApiResponse::success(created)))
}

// GET /api/v1/orders/:id
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order status"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orchestrator
        .get_order_status(id, query.refresh)
        .await?;

    if order.user_id != principal.user_id && !principal.is_admin {
        // Same response as a missing order; ids are not probeable.
        return Err(ServiceError::NotFound(format!("order {id} not found")));
    }

    Ok(Json(ApiResponse::success(order.into())))
}

// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses((status = 200, description = "The caller's orders, newest first")),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let (orders, total) = state
        .services
        .orchestrator
        .store()
        .list_for_user(principal.user_id, query.page, query.limit)
        .await?;

    let items: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    let total_pages = total.div_ceil(query.limit.max(1));
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit: query.limit,
        total_pages,
    })))
}

// POST /api/v1/orders/:id/refund
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/refund",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Order refunded"),
        (status = 403, description = "Administrator required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not refundable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> ApiResult<OrderResponse> {
    principal.require_admin()?;
    request.validate()?;

    let order = state
        .services
        .orchestrator
        .refund(id, request.amount, &request.reason)
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}
