use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

/// Stable machine-readable error codes returned to API clients.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INSUFFICIENT_INVENTORY: &str = "INSUFFICIENT_INVENTORY";
    pub const GATEWAY_REF_MISMATCH: &str = "GATEWAY_REF_MISMATCH";
    pub const DUPLICATE_REFUND: &str = "DUPLICATE_REFUND";
    pub const REFUND_WINDOW_EXPIRED: &str = "REFUND_WINDOW_EXPIRED";
    pub const REFUND_AMOUNT_EXCEEDED: &str = "REFUND_AMOUNT_EXCEEDED";
    pub const PAYMENT_NOT_COMPLETED: &str = "PAYMENT_NOT_COMPLETED";
    pub const PAYMENT_METHOD_DISABLED: &str = "PAYMENT_METHOD_DISABLED";
    pub const INVALID_STATUS: &str = "INVALID_STATUS";
    pub const SIGNATURE_MISMATCH: &str = "SIGNATURE_MISMATCH";
    pub const GATEWAY_ERROR: &str = "GATEWAY_ERROR";
    pub const CONCURRENT_MODIFICATION: &str = "CONCURRENT_MODIFICATION";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Standardized error payload for HTTP responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "code": "DUPLICATE_REFUND",
    "message": "A refund of 1180.00 already exists for this payment",
    "details": null,
    "timestamp": "2025-06-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable code for programmatic branching
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Structured error details (e.g., available stock on reservation failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Duplicate or conflicting write (duplicate refund, gateway reference
    /// mismatch). Carries a stable code from [`codes`].
    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    /// Operation invalid for the current order/payment status (refund window
    /// expired, payment not completed, illegal status transition).
    #[error("{message}")]
    StateError { code: &'static str, message: String },

    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock { product_id: Uuid, available: i32 },

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Signature verification failed")]
    SignatureMismatch,

    #[error("Concurrent modification of {0}")]
    ConcurrentModification(Uuid),

    #[error("Event error: {0}")]
    EventError(String),

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
    /// Wraps a string-based database failure.
    pub fn db_error(message: impl Into<String>) -> Self {
        ServiceError::DatabaseError(DbErr::Custom(message.into()))
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn state(code: &'static str, message: impl Into<String>) -> Self {
        ServiceError::StateError {
            code,
            message: message.into(),
        }
    }

    /// Stable machine code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                codes::INTERNAL_ERROR
            }
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::ValidationError(_) => codes::VALIDATION_ERROR,
            Self::Conflict { code, .. } | Self::StateError { code, .. } => code,
            Self::InsufficientStock { .. } => codes::INSUFFICIENT_INVENTORY,
            Self::GatewayError(_) => codes::GATEWAY_ERROR,
            Self::SignatureMismatch => codes::SIGNATURE_MISMATCH,
            Self::ConcurrentModification(_) => codes::CONCURRENT_MODIFICATION,
            Self::EventError(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::StateError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::SignatureMismatch => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message suitable for HTTP responses. Internal failures return generic
    /// text to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Structured details for errors where the caller needs more than a
    /// message, e.g. available stock for an accurate out-of-stock display.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock {
                product_id,
                available,
            } => Some(json!({
                "product_id": product_id,
                "available_quantity": available,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
