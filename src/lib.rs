//! Memberly API Library
//!
//! Payment orchestration and membership lifecycle engine: four payment
//! networks behind one order state machine, webhook reconciliation,
//! proration, auto-renewal and risk gating.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod providers;
pub mod services;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub redis: Option<Arc<redis::Client>>,
}

/// Common query parameters for list endpoints
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// The versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/refund", post(handlers::orders::refund_order))
        .route(
            "/memberships/me",
            get(handlers::memberships::get_my_membership),
        )
        .route(
            "/memberships/change-price",
            get(handlers::memberships::change_price),
        )
        .route("/renewals/enable", post(handlers::renewals::enable_renewal))
        .route(
            "/renewals/disable",
            post(handlers::renewals::disable_renewal),
        )
        .route(
            "/webhooks/:provider",
            post(handlers::webhooks::provider_webhook),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::orders::create_order,
        handlers::orders::get_order,
        handlers::orders::list_orders,
        handlers::orders::refund_order,
        handlers::memberships::get_my_membership,
        handlers::memberships::change_price,
        handlers::renewals::enable_renewal,
        handlers::renewals::disable_renewal,
        handlers::webhooks::provider_webhook,
        handlers::health::health,
    ),
    components(schemas(
        errors::ErrorResponse,
        handlers::orders::CreateOrderRequest,
        handlers::orders::RefundRequest,
        handlers::orders::OrderResponse,
        handlers::memberships::MembershipResponse,
        handlers::renewals::EnableRenewalRequest,
        handlers::renewals::SubscriptionResponse,
        services::memberships::ChangeQuote,
        services::coupons::CouponQuote,
        services::orchestrator::OrderCreated,
        services::renewals::SweepSummary,
    )),
    info(
        title = "Memberly API",
        description = "Membership commerce backend: payment orchestration and membership lifecycle"
    )
)]
pub struct ApiDoc;

/// Machine-readable API description.
pub async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
