use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ErrorResponse, ServiceError};
use crate::handlers::{AddressDto, PaymentIntentResponse};
use crate::services::checkout::CheckoutInput;
use crate::services::orders::NewOrderLine;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutItemDto {
    pub product_id: Uuid,
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    /// Registered buyer. Exactly one of this and `guest_email` must be set.
    pub customer_id: Option<Uuid>,
    #[validate(email(message = "Guest email must be a valid email address"))]
    pub guest_email: Option<String>,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,
    #[validate(length(min = 1, message = "Cart must contain at least one item"))]
    #[validate]
    pub items: Vec<CheckoutItemDto>,
    pub coupon_code: Option<String>,
    pub redeem_points: Option<i64>,
    #[validate]
    pub shipping_address: AddressDto,
    #[validate]
    pub billing_address: Option<AddressDto>,
    #[serde(default)]
    pub gift_wrap: bool,
}

impl CheckoutRequest {
    fn into_input(self) -> Result<CheckoutInput, ServiceError> {
        let shipping_address = serde_json::to_value(&self.shipping_address)
            .map_err(|e| ServiceError::ValidationError(format!("Invalid shipping address: {e}")))?;
        let billing_address = self
            .billing_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ServiceError::ValidationError(format!("Invalid billing address: {e}")))?;

        Ok(CheckoutInput {
            customer_id: self.customer_id,
            guest_email: self.guest_email,
            payment_method: self.payment_method,
            lines: self
                .items
                .into_iter()
                .map(|item| NewOrderLine {
                    product_id: item.product_id,
                    name: item.name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            coupon_code: self.coupon_code,
            redeem_points: self.redeem_points,
            shipping_address,
            billing_address,
            gift_wrap: self.gift_wrap,
        })
    }
}

/// Places an order from a cart and opens the gateway payment flow.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order placed, gateway order created", body = PaymentIntentResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 422, description = "Insufficient stock or payment method disabled", body = ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<PaymentIntentResponse>), ServiceError> {
    payload.validate()?;
    let outcome = state
        .services
        .checkout
        .complete_checkout(payload.into_input()?)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}
