use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr,
    TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::order::OrderStatus;
use crate::entities::payment::{self, Entity as PaymentEntity, PaymentStatus};
use crate::entities::refund::{self, Entity as RefundEntity, RefundStatus};
use crate::errors::{codes, ServiceError};
use crate::events::{Event, EventSender};
use crate::services::audit::AuditService;
use crate::services::inventory::InventoryService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;

/// Refund eligibility rules, resolved from configuration at startup.
#[derive(Debug, Clone, Copy)]
pub struct RefundPolicy {
    /// Days after delivery (or placement, if never delivered) during which
    /// a refund may be requested.
    pub window_days: i64,
    /// When set, accepted refunds are handed to the settlement worker
    /// immediately instead of waiting for a manual settle call.
    pub auto_settle: bool,
}

/// A refund request as received from the API surface.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_id: Uuid,
    /// None means a full refund of the payment amount.
    pub amount: Option<Decimal>,
    pub reason: String,
    pub initiated_by: String,
}

/// Refund intake and settlement.
///
/// Intake enforces the refundable-amount bound and rejects duplicate
/// same-amount requests. Bound check and insert run in one transaction
/// that first writes the payment row, so concurrent requests against the
/// same payment serialize and the sum each one sees is final. Identical
/// amounts are additionally caught by the partial unique index on
/// (payment_id, amount) for non-failed rows.
#[derive(Clone)]
pub struct RefundService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
    inventory: Arc<InventoryService>,
    audit: AuditService,
    event_sender: EventSender,
    policy: RefundPolicy,
}

impl RefundService {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        payments: Arc<PaymentService>,
        inventory: Arc<InventoryService>,
        audit: AuditService,
        event_sender: EventSender,
        policy: RefundPolicy,
    ) -> Self {
        Self {
            db,
            orders,
            payments,
            inventory,
            audit,
            event_sender,
            policy,
        }
    }

    pub async fn get_refund(&self, refund_id: Uuid) -> Result<Option<refund::Model>, ServiceError> {
        let db = &*self.db;
        RefundEntity::find_by_id(refund_id)
            .one(db)
            .await
            .map_err(ServiceError::from)
    }

    pub async fn require_refund(&self, refund_id: Uuid) -> Result<refund::Model, ServiceError> {
        self.get_refund(refund_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Refund {refund_id} not found")))
    }

    #[instrument(skip(self))]
    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<refund::Model>, ServiceError> {
        let db = &*self.db;
        RefundEntity::find()
            .filter(refund::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(ServiceError::from)
    }

    /// Accepts a refund request against an order's completed payment.
    ///
    /// Checks, in order: refund window, payment completed, positive amount,
    /// no live same-amount duplicate, and the cumulative bound (non-failed
    /// refunds plus this one must not exceed the payment amount). The last
    /// two run inside a transaction holding a write lock on the payment
    /// row, so a concurrent request cannot slip past the bound between the
    /// sum and the insert.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Result<refund::Model, ServiceError> {
        if request.reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Refund reason is required".to_string(),
            ));
        }

        let order = self.orders.require_order(request.order_id).await?;

        // Window anchors on delivery when it happened, placement otherwise.
        let anchor = order.delivered_at.unwrap_or(order.placed_at);
        let days_elapsed = (Utc::now() - anchor).num_days();
        if days_elapsed > self.policy.window_days {
            return Err(ServiceError::state(
                codes::REFUND_WINDOW_EXPIRED,
                format!(
                    "Refund window of {} days expired {} days ago",
                    self.policy.window_days,
                    days_elapsed - self.policy.window_days
                ),
            ));
        }

        let payment = self.payments.require_by_order(order.id).await?;
        if payment.status != PaymentStatus::Completed {
            return Err(ServiceError::state(
                codes::PAYMENT_NOT_COMPLETED,
                format!(
                    "Payment for order {} is {}, only completed payments are refundable",
                    order.id, payment.status
                ),
            ));
        }

        let amount = request.amount.unwrap_or(payment.amount);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Refund amount must be positive".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        // Writing the payment row takes a row lock for the rest of the
        // transaction, serializing concurrent refund intake per payment.
        PaymentEntity::update_many()
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(payment::Column::Id.eq(payment.id))
            .exec(&txn)
            .await?;

        let existing = Self::live_refunds_for_payment(&txn, payment.id).await?;
        if let Some(dup) = existing.iter().find(|r| r.amount == amount) {
            return Err(ServiceError::conflict(
                codes::DUPLICATE_REFUND,
                format!("Refund {} already requested for this amount", dup.id),
            ));
        }
        let already_refunded: Decimal = existing.iter().map(|r| r.amount).sum();
        if already_refunded + amount > payment.amount {
            return Err(ServiceError::state(
                codes::REFUND_AMOUNT_EXCEEDED,
                format!(
                    "Refund of {} would exceed payment amount {} ({} already refunded)",
                    amount, payment.amount, already_refunded
                ),
            ));
        }

        let model = refund::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(payment.id),
            order_id: Set(order.id),
            amount: Set(amount),
            currency: Set(payment.currency.clone()),
            initiated_by: Set(request.initiated_by.clone()),
            status: Set(RefundStatus::Requested),
            reason: Set(request.reason.clone()),
            gateway_refund_id: Set(None),
            ..Default::default()
        };

        let refund = match model.insert(&txn).await {
            Ok(r) => r,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                // Lost the race against an identical concurrent request.
                return Err(ServiceError::conflict(
                    codes::DUPLICATE_REFUND,
                    "An identical refund request is already in flight".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        txn.commit().await?;

        counter!("storefront_refunds_requested_total", 1);
        info!(
            refund_id = %refund.id,
            order_id = %order.id,
            amount = %refund.amount,
            "Refund accepted"
        );

        self.audit.record(
            &request.initiated_by,
            "refund.requested",
            "refund",
            refund.id,
            Some(json!({
                "order_id": order.id,
                "payment_id": payment.id,
                "amount": refund.amount,
                "reason": refund.reason,
            })),
        );
        if self.policy.auto_settle {
            self.event_sender
                .send_detached(Event::RefundRequested {
                    refund_id: refund.id,
                    payment_id: payment.id,
                    amount: refund.amount,
                })
                .await;
        } else {
            info!(refund_id = %refund.id, "Auto-settlement disabled, awaiting manual settle");
        }

        Ok(refund)
    }

    /// Moves an accepted refund into processing. Idempotent when the refund
    /// is already processing.
    #[instrument(skip(self))]
    pub async fn mark_processing(&self, refund_id: Uuid) -> Result<refund::Model, ServiceError> {
        let db = &*self.db;

        let result = RefundEntity::update_many()
            .col_expr(
                refund::Column::Status,
                Expr::value(RefundStatus::Processing),
            )
            .col_expr(refund::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(refund::Column::Id.eq(refund_id))
            .filter(refund::Column::Status.eq(RefundStatus::Requested))
            .exec(db)
            .await?;

        let refund = self.require_refund(refund_id).await?;
        if result.rows_affected == 0 && refund.status != RefundStatus::Processing {
            return Err(ServiceError::state(
                codes::INVALID_STATUS,
                format!("Refund {refund_id} is {} and cannot start processing", refund.status),
            ));
        }
        Ok(refund)
    }

    /// Records the settlement outcome reported by the gateway.
    ///
    /// Succeeded settlements that bring the cumulative refunded amount up to
    /// the full payment amount flip the order to refunded and restore its
    /// line-item stock. Failed settlements free the refund's slot in the
    /// bound (the row stops counting) so the request can be retried.
    #[instrument(skip(self))]
    pub async fn complete_settlement(
        &self,
        refund_id: Uuid,
        succeeded: bool,
        gateway_refund_id: Option<String>,
    ) -> Result<refund::Model, ServiceError> {
        let db = &*self.db;
        let refund = self.require_refund(refund_id).await?;

        let target = if succeeded {
            RefundStatus::Succeeded
        } else {
            RefundStatus::Failed
        };

        // Replaying a settlement outcome is a no-op.
        if refund.status == target {
            return Ok(refund);
        }
        if !matches!(
            refund.status,
            RefundStatus::Requested | RefundStatus::Processing
        ) {
            return Err(ServiceError::state(
                codes::INVALID_STATUS,
                format!("Refund {refund_id} already settled as {}", refund.status),
            ));
        }

        let result = RefundEntity::update_many()
            .col_expr(refund::Column::Status, Expr::value(target))
            .col_expr(
                refund::Column::GatewayRefundId,
                Expr::value(gateway_refund_id.clone()),
            )
            .col_expr(refund::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(refund::Column::Id.eq(refund_id))
            .filter(
                refund::Column::Status
                    .is_in([RefundStatus::Requested, RefundStatus::Processing]),
            )
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(refund_id));
        }

        let refund = self.require_refund(refund_id).await?;

        counter!("storefront_refunds_settled_total", 1);
        info!(
            refund_id = %refund.id,
            status = %refund.status,
            "Refund settlement recorded"
        );

        self.event_sender
            .send_detached(Event::RefundSettled {
                refund_id: refund.id,
                succeeded,
            })
            .await;
        self.audit.record(
            "settlement",
            if succeeded {
                "refund.succeeded"
            } else {
                "refund.failed"
            },
            "refund",
            refund.id,
            gateway_refund_id.map(|id| json!({ "gateway_refund_id": id })),
        );

        if succeeded {
            self.finalize_full_refund(&refund).await?;
        }

        Ok(refund)
    }

    /// After a successful settlement, checks whether the payment is now
    /// fully refunded and, if so, transitions the order and restores stock.
    /// Partial refunds leave the order status untouched.
    async fn finalize_full_refund(&self, refund: &refund::Model) -> Result<(), ServiceError> {
        let payment = self.payments.require_by_order(refund.order_id).await?;
        let refunded: Decimal = Self::live_refunds_for_payment(&*self.db, payment.id)
            .await?
            .iter()
            .filter(|r| r.status == RefundStatus::Succeeded)
            .map(|r| r.amount)
            .sum();
        if refunded < payment.amount {
            return Ok(());
        }

        match self
            .orders
            .transition(refund.order_id, OrderStatus::Refunded)
            .await
        {
            Ok(_) => {}
            // Another settlement already flipped the order.
            Err(ServiceError::StateError { .. }) => {
                warn!(order_id = %refund.order_id, "Order already refunded");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        for item in self.orders.get_order_items(refund.order_id).await? {
            if let Err(e) = self
                .inventory
                .restore(item.product_id, item.quantity)
                .await
            {
                error!(
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    error = %e,
                    "Failed to restore stock for refunded order"
                );
            }
        }

        Ok(())
    }

    /// All refunds for a payment that count toward the refundable bound.
    async fn live_refunds_for_payment<C: ConnectionTrait>(
        conn: &C,
        payment_id: Uuid,
    ) -> Result<Vec<refund::Model>, ServiceError> {
        RefundEntity::find()
            .filter(refund::Column::PaymentId.eq(payment_id))
            .filter(refund::Column::Status.ne(RefundStatus::Failed))
            .all(conn)
            .await
            .map_err(ServiceError::from)
    }
}
