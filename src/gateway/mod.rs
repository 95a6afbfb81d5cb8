//! Thin adapter over the external payment processor.
//!
//! The processor's calls are fallible and never assumed idempotent;
//! idempotency (set-once gateway references, unique-keyed payment upserts)
//! is enforced by the services in this crate.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::errors::ServiceError;

/// Gateway-side order handle returned by `create_gateway_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
}

/// Authoritative payment state as reported by the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub status: GatewayPaymentStatus,
    /// Opaque processor payload, persisted verbatim on the payment record.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Created,
    Authorized,
    Captured,
    Failed,
    Refunded,
    #[strum(default)]
    Unknown(String),
}

impl GatewayPaymentStatus {
    /// Only captured/authorized payments count as settled money.
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            GatewayPaymentStatus::Authorized | GatewayPaymentStatus::Captured
        )
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a processor-side order for the given amount and returns its
    /// id. `reference` is our order number, echoed back in webhooks and
    /// dashboards.
    async fn create_gateway_order(
        &self,
        amount: Decimal,
        currency: &str,
        reference: &str,
        notes: Option<serde_json::Value>,
    ) -> Result<GatewayOrder, ServiceError>;

    /// Fetches the authoritative status of a processor-side payment.
    async fn fetch_payment(&self, gateway_payment_id: &str)
        -> Result<GatewayPayment, ServiceError>;
}

/// REST implementation against a Razorpay-style processor API.
#[derive(Clone)]
pub struct RestGateway {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl RestGateway {
    pub fn new(base_url: impl Into<String>, key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }

    /// The processor expresses amounts in minor units (paise, cents).
    fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
        (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| {
                ServiceError::InternalError(format!("amount {amount} out of range for gateway"))
            })
    }
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    id: String,
}

#[async_trait]
impl PaymentGateway for RestGateway {
    #[instrument(skip(self, notes), fields(reference = %reference))]
    async fn create_gateway_order(
        &self,
        amount: Decimal,
        currency: &str,
        reference: &str,
        notes: Option<serde_json::Value>,
    ) -> Result<GatewayOrder, ServiceError> {
        let body = json!({
            "amount": Self::to_minor_units(amount)?,
            "currency": currency,
            "receipt": reference,
            "notes": notes.unwrap_or_else(|| json!({})),
        });

        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("order creation failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayError(format!(
                "order creation returned {status}: {text}"
            )));
        }

        let parsed: GatewayOrderResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("invalid order response: {e}")))?;

        Ok(GatewayOrder {
            gateway_order_id: parsed.id,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, ServiceError> {
        let response = self
            .http
            .get(format!("{}/payments/{}", self.base_url, gateway_payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("payment fetch failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::GatewayError(format!(
                "payment fetch returned {status}"
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("invalid payment response: {e}")))?;

        let status = raw
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .parse::<GatewayPaymentStatus>()
            .unwrap_or_else(|_| GatewayPaymentStatus::Unknown(String::new()));

        Ok(GatewayPayment { status, raw })
    }
}
