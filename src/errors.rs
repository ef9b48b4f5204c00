use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Standardized error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional detail (risk reasons, validation messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Service-layer error taxonomy.
///
/// Provider adapters have their own `ProviderError`; it is mapped into this
/// taxonomy at the orchestrator boundary and never leaks past it.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// CAS race that survived the single internal retry.
    #[error("Transient conflict, retry the request: {0}")]
    TransientError(String),

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Order creation refused by risk policy")]
    RiskDenied { reasons: Vec<String> },

    #[error("Risk assessment unavailable")]
    RiskAssessmentUnavailable,

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Coupon invalid: {0}")]
    CouponInvalid(String),

    #[error("Coupon usage limit reached")]
    CouponExhausted,

    /// Attempted backward state transition or stale webhook. Logged and
    /// absorbed in the webhook path; stale redelivery is expected traffic.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::InvalidStatus(_)
            | Self::CouponInvalid(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateOrder(_)
            | Self::Conflict(_)
            | Self::TransientError(_)
            | Self::CouponExhausted => StatusCode::CONFLICT,
            Self::SignatureInvalid | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::RiskDenied { .. } => StatusCode::FORBIDDEN,
            Self::RiskAssessmentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            // Absorbed before reaching a response in the webhook path; if one
            // escapes elsewhere it is a server-side bug, not a client error.
            Self::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// text to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) | Self::InvariantViolation(_) => {
                "Internal server error".to_string()
            }
            Self::RiskDenied { .. } => "Order creation refused by risk policy".to_string(),
            _ => self.to_string(),
        }
    }

    fn response_details(&self) -> Option<Vec<String>> {
        match self {
            Self::RiskDenied { reasons } => Some(reasons.clone()),
            _ => None,
        }
    }

    /// Whether the caller may safely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientError(_)
                | Self::ProviderUnavailable(_)
                | Self::RiskAssessmentUnavailable
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.response_details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}
