use hmac::{Hmac, Mac};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::payment::PaymentStatus;
use crate::errors::{codes, ServiceError};
use crate::events::{Event, EventSender};
use crate::gateway::PaymentGateway;
use crate::services::audit::AuditService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;

type HmacSha256 = Hmac<Sha256>;

/// Client-relayed proof that the gateway accepted a payment.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    pub order_id: Uuid,
    pub gateway_order_ref: String,
    pub gateway_payment_ref: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationOutcome {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub idempotent_replay: bool,
}

/// Computes the hex HMAC-SHA256 over `"{order_ref}|{payment_ref}"`.
///
/// The same function signs outbound test fixtures and verifies inbound
/// confirmations, so the payload layout lives in exactly one place.
pub fn sign_confirmation(secret: &str, gateway_order_ref: &str, gateway_payment_ref: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{gateway_order_ref}|{gateway_payment_ref}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_confirmation_signature(
    secret: &str,
    gateway_order_ref: &str,
    gateway_payment_ref: &str,
    supplied: &str,
) -> Result<(), ServiceError> {
    let supplied = hex::decode(supplied).map_err(|_| ServiceError::SignatureMismatch)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InternalError("Invalid signing key".to_string()))?;
    mac.update(format!("{gateway_order_ref}|{gateway_payment_ref}").as_bytes());
    // Constant-time comparison.
    mac.verify_slice(&supplied)
        .map_err(|_| ServiceError::SignatureMismatch)
}

/// Verifies a relayed payment confirmation and promotes the order to paid.
///
/// The client relay is untrusted: the signature is checked first, then the
/// payment is re-fetched from the gateway directly. Only after both checks
/// pass does any state change.
#[derive(Clone)]
pub struct ConfirmationService {
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
    gateway: Arc<dyn PaymentGateway>,
    audit: AuditService,
    event_sender: EventSender,
    signature_secret: String,
    gateway_name: String,
}

impl ConfirmationService {
    pub fn new(
        orders: Arc<OrderService>,
        payments: Arc<PaymentService>,
        gateway: Arc<dyn PaymentGateway>,
        audit: AuditService,
        event_sender: EventSender,
        signature_secret: String,
        gateway_name: String,
    ) -> Self {
        Self {
            orders,
            payments,
            gateway,
            audit,
            event_sender,
            signature_secret,
            gateway_name,
        }
    }

    /// Confirms a payment. Safe to deliver any number of times: replays of
    /// an already-completed confirmation return the stored outcome with
    /// `idempotent_replay` set and change nothing.
    #[instrument(skip(self, confirmation), fields(order_id = %confirmation.order_id))]
    pub async fn confirm(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let order = self.orders.require_order(confirmation.order_id).await?;

        // The relayed reference must be the one this order was handed at
        // checkout. A mismatch means the client is confirming against the
        // wrong (or a forged) gateway order.
        match order.gateway_order_ref.as_deref() {
            Some(stored) if stored == confirmation.gateway_order_ref => {}
            Some(_) | None => {
                warn!(order_id = %order.id, "Gateway order reference mismatch on confirmation");
                return Err(ServiceError::conflict(
                    codes::GATEWAY_REF_MISMATCH,
                    format!(
                        "Gateway order reference does not match order {}",
                        order.id
                    ),
                ));
            }
        }

        verify_confirmation_signature(
            &self.signature_secret,
            &confirmation.gateway_order_ref,
            &confirmation.gateway_payment_ref,
            &confirmation.signature,
        )?;

        let gateway_payment = self
            .gateway
            .fetch_payment(&confirmation.gateway_payment_ref)
            .await?;
        if !gateway_payment.status.is_successful() {
            return Err(ServiceError::GatewayError(format!(
                "Gateway reports payment {} as '{}'",
                confirmation.gateway_payment_ref, gateway_payment.status
            )));
        }

        let prior = self.payments.find_by_order(order.id).await?;
        let idempotent_replay = prior
            .as_ref()
            .map(|p| p.status == PaymentStatus::Completed)
            .unwrap_or(false);

        let payment = self
            .payments
            .upsert_completed(
                order.id,
                order.total,
                &order.currency,
                &self.gateway_name,
                &confirmation.gateway_order_ref,
                &confirmation.gateway_payment_ref,
                gateway_payment.raw,
            )
            .await?;

        let order = self.orders.mark_paid(order.id).await?;

        if idempotent_replay {
            info!(order_id = %order.id, "Duplicate payment confirmation absorbed");
        } else {
            counter!("storefront_payments_confirmed_total", 1);
            self.audit.record(
                "gateway",
                "payment.confirmed",
                "order",
                order.id,
                Some(json!({
                    "payment_id": payment.id,
                    "gateway_payment_ref": confirmation.gateway_payment_ref,
                    "amount": payment.amount,
                })),
            );
            self.event_sender
                .send_detached(Event::PaymentCompleted {
                    order_id: order.id,
                    payment_id: payment.id,
                    amount: payment.amount,
                })
                .await;
        }

        Ok(ConfirmationOutcome {
            order_id: order.id,
            payment_id: payment.id,
            order_status: order.status,
            payment_status: payment.status,
            idempotent_replay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip_verifies() {
        let secret = "test_secret_key_for_testing_purposes_only_32chars";
        let sig = sign_confirmation(secret, "gw_order_1", "gw_pay_1");
        assert!(verify_confirmation_signature(secret, "gw_order_1", "gw_pay_1", &sig).is_ok());
    }

    #[test]
    fn tampered_payment_ref_fails_verification() {
        let secret = "test_secret_key_for_testing_purposes_only_32chars";
        let sig = sign_confirmation(secret, "gw_order_1", "gw_pay_1");
        let err =
            verify_confirmation_signature(secret, "gw_order_1", "gw_pay_2", &sig).unwrap_err();
        assert!(matches!(err, ServiceError::SignatureMismatch));
    }

    #[test]
    fn non_hex_signature_is_a_mismatch_not_a_crash() {
        let secret = "test_secret_key_for_testing_purposes_only_32chars";
        let err = verify_confirmation_signature(secret, "gw_order_1", "gw_pay_1", "zz-not-hex")
            .unwrap_err();
        assert!(matches!(err, ServiceError::SignatureMismatch));
    }

    #[test]
    fn signatures_differ_per_secret() {
        let a = sign_confirmation("secret_a_secret_a_secret_a_secret_a", "o", "p");
        let b = sign_confirmation("secret_b_secret_b_secret_b_secret_b", "o", "p");
        assert_ne!(a, b);
    }
}
