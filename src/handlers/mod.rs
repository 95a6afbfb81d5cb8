pub mod checkout;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod refunds;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Shared wire shape for a postal address. Stored verbatim on the order as
/// a JSON snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate, ToSchema)]
pub struct AddressDto {
    #[validate(length(min = 1, message = "Recipient name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
    pub phone: Option<String>,
}

/// Checkout/payment-intent response: everything the client needs to start
/// the gateway payment flow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntentResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub gateway_order_ref: String,
    #[schema(value_type = String)]
    pub amount: rust_decimal::Decimal,
    pub currency: String,
}

impl From<crate::services::checkout::CheckoutOutcome> for PaymentIntentResponse {
    fn from(outcome: crate::services::checkout::CheckoutOutcome) -> Self {
        Self {
            order_id: outcome.order_id,
            order_number: outcome.order_number,
            gateway_order_ref: outcome.gateway_order_ref,
            amount: outcome.amount,
            currency: outcome.currency,
        }
    }
}
