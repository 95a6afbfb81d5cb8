use metrics::counter;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{order, payment};
use crate::errors::{codes, ServiceError};
use crate::events::{Event, EventSender};
use crate::gateway::PaymentGateway;
use crate::services::audit::AuditService;
use crate::services::discounts::{DiscountError, DiscountResolver};
use crate::services::inventory::{InventoryService, StockReservation};
use crate::services::orders::{NewOrder, NewOrderLine, OrderAmounts, OrderService};
use crate::services::payments::PaymentService;

/// Checkout-time pricing and gating rules, resolved from configuration at
/// startup. Client-supplied amounts are advisory only: tax and shipping are
/// always recomputed here.
#[derive(Debug, Clone)]
pub struct CheckoutPolicy {
    pub enabled_payment_methods: Vec<String>,
    pub currency: String,
    pub tax_rate_percent: Decimal,
    pub shipping_flat: Decimal,
    pub gift_wrap_fee: Decimal,
    pub gateway_name: String,
}

impl CheckoutPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            enabled_payment_methods: cfg.enabled_payment_methods.clone(),
            currency: cfg.currency.clone(),
            tax_rate_percent: Decimal::from_f64(cfg.tax_rate_percent).unwrap_or(dec!(0)),
            shipping_flat: Decimal::from_f64(cfg.shipping_flat).unwrap_or(dec!(0)),
            gift_wrap_fee: Decimal::from_f64(cfg.gift_wrap_fee).unwrap_or(dec!(0)),
            gateway_name: cfg.gateway_name.clone(),
        }
    }

    fn payment_method_enabled(&self, method: &str) -> bool {
        self.enabled_payment_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Derives the order amounts from a subtotal and the resolved discounts.
    fn amounts(
        &self,
        subtotal: Decimal,
        discounts: &crate::services::discounts::DiscountBreakdown,
        gift_wrap: bool,
    ) -> OrderAmounts {
        // Discounts can never push the taxable base below zero.
        let coupon = discounts.coupon_discount.min(subtotal);
        let loyalty = discounts.loyalty_discount.min(subtotal - coupon);
        let taxable = subtotal - coupon - loyalty;
        let tax = (taxable * self.tax_rate_percent / dec!(100)).round_dp(2);
        let mut shipping = self.shipping_flat;
        if gift_wrap {
            shipping += self.gift_wrap_fee;
        }

        OrderAmounts {
            subtotal,
            coupon_discount: coupon,
            loyalty_discount: loyalty,
            tax_amount: tax,
            shipping_cost: shipping,
        }
    }
}

/// A single checkout attempt.
#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub customer_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub payment_method: String,
    pub lines: Vec<NewOrderLine>,
    pub coupon_code: Option<String>,
    pub redeem_points: Option<i64>,
    pub shipping_address: serde_json::Value,
    pub billing_address: Option<serde_json::Value>,
    pub gift_wrap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub order_number: String,
    pub gateway_order_ref: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Drives a cart through order creation and gateway order setup. Payment
/// completion happens out-of-band through the confirmation protocol.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<OrderService>,
    inventory: Arc<InventoryService>,
    payments: Arc<PaymentService>,
    gateway: Arc<dyn PaymentGateway>,
    discounts: Arc<dyn DiscountResolver>,
    audit: AuditService,
    event_sender: EventSender,
    policy: CheckoutPolicy,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<OrderService>,
        inventory: Arc<InventoryService>,
        payments: Arc<PaymentService>,
        gateway: Arc<dyn PaymentGateway>,
        discounts: Arc<dyn DiscountResolver>,
        audit: AuditService,
        event_sender: EventSender,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            orders,
            inventory,
            payments,
            gateway,
            discounts,
            audit,
            event_sender,
            policy,
        }
    }

    /// Runs a complete checkout attempt.
    ///
    /// Inventory is the only resource that must be compensated in-request:
    /// every successful reservation is journaled, and any subsequent failure
    /// before the order commits walks the journal in reverse and restores
    /// stock before surfacing the error. A failure after the order commits
    /// leaves a `pending` order for background reconciliation to expire.
    #[instrument(skip(self, input), fields(payment_method = %input.payment_method))]
    pub async fn complete_checkout(
        &self,
        input: CheckoutInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cart is empty".to_string(),
            ));
        }
        if !self.policy.payment_method_enabled(&input.payment_method) {
            return Err(ServiceError::state(
                codes::PAYMENT_METHOD_DISABLED,
                format!(
                    "Payment method '{}' is not currently enabled",
                    input.payment_method
                ),
            ));
        }

        let subtotal: Decimal = input
            .lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();

        let discounts = self.resolve_discounts(&input, subtotal).await?;

        // Reserve stock line by line, journaling completed reservations for
        // compensating rollback.
        let mut journal: Vec<StockReservation> = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            match self.inventory.reserve(line.product_id, line.quantity).await {
                Ok(reservation) => journal.push(reservation),
                Err(e) => {
                    self.rollback_reservations(&journal).await;
                    return Err(e);
                }
            }
        }

        let amounts = self.policy.amounts(subtotal, &discounts, input.gift_wrap);
        let billing = input
            .billing_address
            .clone()
            .unwrap_or_else(|| input.shipping_address.clone());

        let order = match self
            .orders
            .create_order(NewOrder {
                customer_id: input.customer_id,
                guest_email: input.guest_email.clone(),
                payment_method: input.payment_method.clone(),
                currency: self.policy.currency.clone(),
                lines: input.lines.clone(),
                amounts,
                shipping_address: input.shipping_address.clone(),
                billing_address: billing,
                gift_wrap: input.gift_wrap,
            })
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // The order did not commit, so the reservations must not
                // outlive this request.
                self.rollback_reservations(&journal).await;
                return Err(e);
            }
        };

        let (gateway_ref, _payment) = self.ensure_gateway_order(&order).await?;

        counter!("storefront_checkouts_completed_total", 1);
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total,
            "Checkout completed"
        );

        self.audit.record(
            input
                .guest_email
                .as_deref()
                .unwrap_or("customer"),
            "checkout.completed",
            "order",
            order.id,
            Some(json!({
                "total": order.total,
                "currency": order.currency,
                "gateway_order_ref": gateway_ref,
            })),
        );
        self.event_sender
            .send_detached(Event::CheckoutCompleted {
                order_id: order.id,
                gateway_order_ref: gateway_ref.clone(),
            })
            .await;

        Ok(CheckoutOutcome {
            order_id: order.id,
            order_number: order.order_number,
            gateway_order_ref: gateway_ref,
            amount: order.total,
            currency: order.currency,
        })
    }

    /// Creates the gateway-side order for a pending order, exactly once.
    ///
    /// If the order already carries a gateway reference (client retry), the
    /// stored value is returned instead of creating a duplicate gateway
    /// order. The set-once write is an update-if-null, so a concurrent
    /// retry that loses the race also converges on the stored value.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn ensure_gateway_order(
        &self,
        order: &order::Model,
    ) -> Result<(String, payment::Model), ServiceError> {
        if let Some(existing) = &order.gateway_order_ref {
            let payment = match self.payments.find_by_order(order.id).await? {
                Some(p) => p,
                None => {
                    self.payments
                        .record_pending(
                            order.id,
                            order.total,
                            &order.currency,
                            &self.policy.gateway_name,
                            existing,
                        )
                        .await?
                }
            };
            return Ok((existing.clone(), payment));
        }

        let created = self
            .gateway
            .create_gateway_order(
                order.total,
                &order.currency,
                &order.order_number,
                Some(json!({ "order_id": order.id })),
            )
            .await?;

        let stored = self
            .orders
            .try_set_gateway_order_ref(order.id, &created.gateway_order_id)
            .await?;

        let payment = self
            .payments
            .record_pending(
                order.id,
                order.total,
                &order.currency,
                &self.policy.gateway_name,
                &stored,
            )
            .await?;

        Ok((stored, payment))
    }

    /// Retry surface for clients that lost the checkout response: returns
    /// the existing gateway reference, creating it only if missing.
    #[instrument(skip(self))]
    pub async fn payment_intent(&self, order_id: Uuid) -> Result<CheckoutOutcome, ServiceError> {
        let order = self.orders.require_order(order_id).await?;
        if order.status != order::OrderStatus::Pending {
            return Err(ServiceError::state(
                codes::INVALID_STATUS,
                format!("Order {order_id} is {} and cannot accept payment", order.status),
            ));
        }
        let (gateway_ref, _payment) = self.ensure_gateway_order(&order).await?;
        Ok(CheckoutOutcome {
            order_id: order.id,
            order_number: order.order_number,
            gateway_order_ref: gateway_ref,
            amount: order.total,
            currency: order.currency,
        })
    }

    /// Cancels a non-terminal order and returns its reserved stock.
    ///
    /// The status transition is authoritative; restoration is best-effort
    /// per line, so a missing inventory record is logged and skipped
    /// rather than undoing the cancellation.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let order = self.orders.cancel_order(order_id).await?;

        for item in self.orders.get_order_items(order_id).await? {
            if let Err(e) = self
                .inventory
                .restore(item.product_id, item.quantity)
                .await
            {
                error!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    error = %e,
                    "Failed to restore stock for cancelled order"
                );
            }
        }

        self.audit
            .record("system", "order.cancelled", "order", order_id, None);

        Ok(order)
    }

    /// Coupon/loyalty resolution. Engine outages degrade to zero discount;
    /// an explicitly supplied coupon that the engine rejects is fatal.
    async fn resolve_discounts(
        &self,
        input: &CheckoutInput,
        subtotal: Decimal,
    ) -> Result<crate::services::discounts::DiscountBreakdown, ServiceError> {
        match self
            .discounts
            .resolve(
                input.coupon_code.as_deref(),
                input.customer_id,
                input.redeem_points,
                subtotal,
                &input.lines,
            )
            .await
        {
            Ok(breakdown) => Ok(breakdown),
            Err(DiscountError::InvalidCoupon(code)) if input.coupon_code.is_some() => Err(
                ServiceError::ValidationError(format!("Coupon code '{code}' is not valid")),
            ),
            Err(e) => {
                warn!(error = %e, "Discount resolution failed; proceeding with zero discount");
                Ok(Default::default())
            }
        }
    }

    /// Walks the reservation journal in reverse and restores every line.
    /// Restore failures are logged; there is nothing further to unwind.
    async fn rollback_reservations(&self, journal: &[StockReservation]) {
        for reservation in journal.iter().rev() {
            if let Err(e) = self
                .inventory
                .restore(reservation.product_id, reservation.quantity)
                .await
            {
                error!(
                    product_id = %reservation.product_id,
                    quantity = reservation.quantity,
                    error = %e,
                    "Failed to restore reservation during checkout rollback"
                );
            }
        }
    }
}
