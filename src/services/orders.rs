use chrono::Utc;
use metrics::counter;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::errors::{codes, ServiceError};
use crate::events::{Event, EventSender};

/// Monetary components of an order. `total()` is the derived invariant:
/// subtotal - coupon_discount - loyalty_discount + tax_amount + shipping_cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAmounts {
    pub subtotal: Decimal,
    pub coupon_discount: Decimal,
    pub loyalty_discount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
}

impl OrderAmounts {
    pub fn total(&self) -> Decimal {
        self.subtotal - self.coupon_discount - self.loyalty_discount
            + self.tax_amount
            + self.shipping_cost
    }
}

/// A line to snapshot onto a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Input for creating an order in `pending`.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub payment_method: String,
    pub currency: String,
    pub lines: Vec<NewOrderLine>,
    pub amounts: OrderAmounts,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub gift_wrap: bool,
}

/// Order aggregate store: persistence plus the order state machine.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates an order plus its line items in one transaction. Prices on
    /// the lines are snapshots; they are never recomputed afterward.
    #[instrument(skip(self, input), fields(lines = input.lines.len()))]
    pub async fn create_order(&self, input: NewOrder) -> Result<order::Model, ServiceError> {
        match (&input.customer_id, &input.guest_email) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(ServiceError::ValidationError(
                    "Exactly one of customer_id or guest_email must be set".to_string(),
                ))
            }
        }
        if input.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one line item".to_string(),
            ));
        }
        for line in &input.lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for product {} must be positive",
                    line.product_id
                )));
            }
        }

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(input.customer_id),
            guest_email: Set(input.guest_email),
            status: Set(OrderStatus::Pending),
            currency: Set(input.currency),
            subtotal: Set(input.amounts.subtotal),
            coupon_discount: Set(input.amounts.coupon_discount),
            loyalty_discount: Set(input.amounts.loyalty_discount),
            tax_amount: Set(input.amounts.tax_amount),
            shipping_cost: Set(input.amounts.shipping_cost),
            total: Set(input.amounts.total()),
            payment_method: Set(input.payment_method),
            gift_wrap: Set(input.gift_wrap),
            shipping_address: Set(input.shipping_address),
            billing_address: Set(input.billing_address),
            gateway_order_ref: Set(None),
            placed_at: Set(now),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        for line in &input.lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.unit_price * Decimal::from(line.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        counter!("storefront_orders_created_total", 1);
        info!(order_id = %order_id, order_number = %order_number, total = %order_model.total, "Order created");

        self.event_sender
            .send_detached(Event::OrderCreated(order_id))
            .await;

        Ok(order_model)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let db = &*self.db;
        OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::from)
    }

    /// Loads an order or fails with NotFound.
    pub async fn require_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    #[instrument(skip(self))]
    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let db = &*self.db;
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(ServiceError::from)
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > 500 {
            return Err(ServiceError::ValidationError(
                "Limit must be between 1 and 500".to_string(),
            ));
        }

        let db = &*self.db;
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, limit);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        Ok((orders, total))
    }

    /// Stores the gateway order reference, at most once.
    ///
    /// Expressed as an update-if-null so concurrent client retries cannot
    /// overwrite each other; the value actually stored is read back and
    /// returned, which is what the caller must use from then on.
    #[instrument(skip(self))]
    pub async fn try_set_gateway_order_ref(
        &self,
        order_id: Uuid,
        gateway_ref: &str,
    ) -> Result<String, ServiceError> {
        let db = &*self.db;

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::GatewayOrderRef,
                Expr::value(Some(gateway_ref.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::GatewayOrderRef.is_null())
            .exec(db)
            .await?;

        let order = self.require_order(order_id).await?;
        let stored = order.gateway_order_ref.ok_or_else(|| {
            ServiceError::InternalError(format!(
                "gateway reference missing on order {order_id} after set"
            ))
        })?;

        if result.rows_affected == 0 && stored != gateway_ref {
            info!(
                order_id = %order_id,
                stored = %stored,
                "Gateway reference already set; keeping stored value"
            );
        }

        Ok(stored)
    }

    /// Moves a pending order to `paid`. The update is conditional on the
    /// current status, so duplicate confirmations and post-cancellation
    /// confirmations cannot regress or double-apply; the caller inspects
    /// the returned model for the outcome.
    #[instrument(skip(self))]
    pub async fn mark_paid(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let db = &*self.db;

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(db)
            .await?;

        let order = self.require_order(order_id).await?;

        if result.rows_affected == 1 {
            counter!("storefront_orders_paid_total", 1);
            info!(order_id = %order_id, "Order marked paid");
            self.event_sender
                .send_detached(Event::OrderStatusChanged {
                    order_id,
                    old_status: OrderStatus::Pending.to_string(),
                    new_status: OrderStatus::Paid.to_string(),
                })
                .await;
        } else if order.status.is_terminal() {
            warn!(order_id = %order_id, status = %order.status, "Payment confirmed for a terminal order; status left unchanged");
        }

        Ok(order)
    }

    /// Guarded status transition for fulfillment, cancellation, and refund
    /// completion. Idempotent when the order is already in the target state.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db;
        let order = self.require_order(order_id).await?;

        if order.status == to {
            return Ok(order);
        }
        if !order.status.can_transition_to(to) {
            return Err(ServiceError::state(
                codes::INVALID_STATUS,
                format!("Cannot transition order from {} to {}", order.status, to),
            ));
        }

        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            );
        if to == OrderStatus::Delivered {
            update = update.col_expr(order::Column::DeliveredAt, Expr::value(Some(Utc::now())));
        }

        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(order.status))
            .filter(order::Column::Version.eq(order.version))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        info!(order_id = %order_id, from = %order.status, to = %to, "Order status changed");
        self.event_sender
            .send_detached(Event::OrderStatusChanged {
                order_id,
                old_status: order.status.to_string(),
                new_status: to.to_string(),
            })
            .await;

        self.require_order(order_id).await
    }

    /// Cancels a non-terminal order.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let order = self.transition(order_id, OrderStatus::Cancelled).await?;
        self.event_sender
            .send_detached(Event::OrderCancelled(order_id))
            .await;
        Ok(order)
    }
}

fn generate_order_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("ORD-{}-{:06}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}
