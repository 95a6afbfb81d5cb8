use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ErrorResponse, ServiceError};
use crate::handlers::PaymentIntentResponse;
use crate::services::confirmation::PaymentConfirmation;
use crate::AppState;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "Gateway order reference is required"))]
    pub gateway_order_ref: String,
    #[validate(length(min = 1, message = "Gateway payment reference is required"))]
    pub gateway_payment_ref: String,
    #[validate(length(min = 1, message = "Signature is required"))]
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfirmPaymentResponse {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub order_status: String,
    pub payment_status: String,
    /// True when this confirmation had already been processed.
    pub idempotent_replay: bool,
}

/// Verifies a client-relayed payment confirmation and marks the order paid.
///
/// Safe to call repeatedly with the same payload.
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed", body = ConfirmPaymentResponse),
        (status = 401, description = "Signature verification failed", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse),
        (status = 409, description = "Gateway order reference mismatch", body = ErrorResponse),
        (status = 502, description = "Gateway rejected or cannot verify the payment", body = ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, ServiceError> {
    payload.validate()?;
    let outcome = state
        .services
        .confirmation
        .confirm(PaymentConfirmation {
            order_id: payload.order_id,
            gateway_order_ref: payload.gateway_order_ref,
            gateway_payment_ref: payload.gateway_payment_ref,
            signature: payload.signature,
        })
        .await?;
    Ok(Json(ConfirmPaymentResponse {
        order_id: outcome.order_id,
        payment_id: outcome.payment_id,
        order_status: outcome.order_status.to_string(),
        payment_status: outcome.payment_status.to_string(),
        idempotent_replay: outcome.idempotent_replay,
    }))
}

/// Returns the gateway payment handle for a pending order, creating the
/// gateway order if checkout's handoff was lost.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment-intent",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Gateway payment handle", body = PaymentIntentResponse),
        (status = 404, description = "Order not found", body = ErrorResponse),
        (status = 422, description = "Order is not awaiting payment", body = ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_intent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentIntentResponse>, ServiceError> {
    let outcome = state.services.checkout.payment_intent(id).await?;
    Ok(Json(outcome.into()))
}
