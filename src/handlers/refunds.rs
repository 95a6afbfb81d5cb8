use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::refund::{self, RefundStatus};
use crate::errors::{ErrorResponse, ServiceError};
use crate::services::refunds::RefundRequest;
use crate::AppState;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRefundRequest {
    /// Omit for a full refund.
    #[schema(value_type = Option<String>)]
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, message = "Refund reason is required"))]
    pub reason: String,
    /// Who asked for the refund; defaults to "customer".
    pub initiated_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SettleRefundRequest {
    pub succeeded: bool,
    pub gateway_refund_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefundResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_id: Uuid,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub reason: String,
    pub initiated_by: String,
    pub gateway_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<refund::Model> for RefundResponse {
    fn from(refund: refund::Model) -> Self {
        Self {
            id: refund.id,
            order_id: refund.order_id,
            payment_id: refund.payment_id,
            amount: refund.amount,
            currency: refund.currency,
            status: refund.status.to_string(),
            reason: refund.reason,
            initiated_by: refund.initiated_by,
            gateway_refund_id: refund.gateway_refund_id,
            created_at: refund.created_at,
        }
    }
}

/// Requests a refund against an order's completed payment.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/refunds",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = CreateRefundRequest,
    responses(
        (status = 201, description = "Refund accepted", body = RefundResponse),
        (status = 404, description = "Order or payment not found", body = ErrorResponse),
        (status = 409, description = "Duplicate refund request", body = ErrorResponse),
        (status = 422, description = "Window expired, amount exceeded, or payment not completed", body = ErrorResponse)
    ),
    tag = "refunds"
)]
pub async fn create_refund(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<RefundResponse>), ServiceError> {
    payload.validate()?;
    let refund = state
        .services
        .refunds
        .create_refund(RefundRequest {
            order_id,
            amount: payload.amount,
            reason: payload.reason,
            initiated_by: payload.initiated_by.unwrap_or_else(|| "customer".to_string()),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(refund.into())))
}

/// Lists refunds for an order.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/refunds",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Refunds for the order", body = [RefundResponse]),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    tag = "refunds"
)]
pub async fn list_refunds(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<RefundResponse>>, ServiceError> {
    state.services.orders.require_order(order_id).await?;
    let refunds = state.services.refunds.list_for_order(order_id).await?;
    Ok(Json(refunds.into_iter().map(Into::into).collect()))
}

/// Records the gateway's settlement outcome for a refund.
///
/// This is the surface the settlement worker (or an operator, when
/// auto-settlement is off) reports back through.
#[utoipa::path(
    post,
    path = "/api/v1/refunds/{id}/settle",
    params(("id" = Uuid, Path, description = "Refund id")),
    request_body = SettleRefundRequest,
    responses(
        (status = 200, description = "Settlement recorded", body = RefundResponse),
        (status = 404, description = "Refund not found", body = ErrorResponse),
        (status = 422, description = "Refund already settled differently", body = ErrorResponse)
    ),
    tag = "refunds"
)]
pub async fn settle_refund(
    State(state): State<AppState>,
    Path(refund_id): Path<Uuid>,
    Json(payload): Json<SettleRefundRequest>,
) -> Result<Json<RefundResponse>, ServiceError> {
    let refund = state.services.refunds.require_refund(refund_id).await?;
    if refund.status == RefundStatus::Requested {
        state.services.refunds.mark_processing(refund_id).await?;
    }
    let refund = state
        .services
        .refunds
        .complete_settlement(refund_id, payload.succeeded, payload.gateway_refund_id)
        .await?;
    Ok(Json(refund.into()))
}
