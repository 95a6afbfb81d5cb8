use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::payment::{self, Entity as PaymentEntity, PaymentStatus};
use crate::errors::ServiceError;

/// Payment record store. One logical payment per order, enforced by the
/// unique index on `order_id`; all writes go through single-statement
/// upserts so duplicate confirmation deliveries collapse into one record.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError> {
        let db = &*self.db;
        PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(db)
            .await
            .map_err(ServiceError::from)
    }

    /// Loads the payment for an order or fails with NotFound.
    pub async fn require_by_order(&self, order_id: Uuid) -> Result<payment::Model, ServiceError> {
        self.find_by_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No payment for order {order_id}")))
    }

    /// Records a pending payment on first gateway-order creation. Keyed by
    /// order id with insert-if-absent semantics, so a client retrying the
    /// checkout handoff cannot create a second record.
    #[instrument(skip(self))]
    pub async fn record_pending(
        &self,
        order_id: Uuid,
        amount: Decimal,
        currency: &str,
        gateway: &str,
        gateway_order_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            gateway: Set(gateway.to_string()),
            gateway_order_id: Set(Some(gateway_order_id.to_string())),
            gateway_payment_id: Set(None),
            status: Set(PaymentStatus::Pending),
            gateway_metadata: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        PaymentEntity::insert(model)
            .on_conflict(
                OnConflict::column(payment::Column::OrderId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;

        self.require_by_order(order_id).await
    }

    /// Idempotent completion upsert, the correctness boundary for duplicate
    /// confirmation deliveries.
    ///
    /// A single INSERT ... ON CONFLICT (order_id) DO UPDATE ... WHERE
    /// status <> 'completed' either creates the record as completed,
    /// promotes an existing pending/failed record, or does nothing when the
    /// record is already completed. The payment never regresses.
    #[instrument(skip(self, gateway_metadata))]
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_completed(
        &self,
        order_id: Uuid,
        amount: Decimal,
        currency: &str,
        gateway: &str,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        gateway_metadata: serde_json::Value,
    ) -> Result<payment::Model, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            gateway: Set(gateway.to_string()),
            gateway_order_id: Set(Some(gateway_order_id.to_string())),
            gateway_payment_id: Set(Some(gateway_payment_id.to_string())),
            status: Set(PaymentStatus::Completed),
            gateway_metadata: Set(Some(gateway_metadata)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        PaymentEntity::insert(model)
            .on_conflict(
                OnConflict::column(payment::Column::OrderId)
                    .update_columns([
                        payment::Column::Status,
                        payment::Column::GatewayPaymentId,
                        payment::Column::GatewayMetadata,
                        payment::Column::UpdatedAt,
                    ])
                    .action_and_where(
                        Expr::col(payment::Column::Status).ne(PaymentStatus::Completed),
                    )
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;

        let stored = self.require_by_order(order_id).await?;

        counter!("storefront_payments_completed_total", 1);
        info!(
            order_id = %order_id,
            payment_id = %stored.id,
            status = %stored.status,
            "Payment record upserted"
        );

        Ok(stored)
    }
}
