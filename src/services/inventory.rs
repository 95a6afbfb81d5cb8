use metrics::counter;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_level::{self, Entity as InventoryLevel};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// A successfully reserved quantity, kept so a failed checkout can walk its
/// reservations in reverse and restore them.
#[derive(Debug, Clone, Copy)]
pub struct StockReservation {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Inventory ledger: atomic reserve/restore over per-product stock.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Atomically reserves `quantity` units of a product.
    ///
    /// The decrement and the sufficient-stock check execute as a single
    /// conditional UPDATE, so concurrent reservations serialize at the
    /// storage layer and the sum of successful reservations never exceeds
    /// the stock that existed before any of them ran.
    ///
    /// Ordinary insufficient stock is reported as
    /// `InsufficientStock { product_id, available }`, carrying the current
    /// availability so callers can render an accurate out-of-stock message.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<StockReservation, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let db = &*self.db;

        let result = InventoryLevel::update_many()
            .col_expr(
                inventory_level::Column::Quantity,
                Expr::col(inventory_level::Column::Quantity).sub(quantity),
            )
            .col_expr(
                inventory_level::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(inventory_level::Column::ProductId.eq(product_id))
            .filter(inventory_level::Column::Quantity.gte(quantity))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            let available = self.available_quantity(product_id).await?;
            return Err(ServiceError::InsufficientStock {
                product_id,
                available,
            });
        }

        counter!("storefront_inventory_reservations_total", 1);

        // Post-reserve visibility: low-stock warning and remaining count.
        if let Some(level) = self.get_level(product_id).await? {
            if level.quantity <= level.low_stock_threshold {
                warn!(
                    product_id = %product_id,
                    remaining = level.quantity,
                    threshold = level.low_stock_threshold,
                    "Stock fell below threshold"
                );
                self.event_sender
                    .send_detached(Event::LowStock {
                        product_id,
                        remaining: level.quantity,
                        threshold: level.low_stock_threshold,
                    })
                    .await;
            }
            self.event_sender
                .send_detached(Event::InventoryReserved {
                    product_id,
                    quantity,
                    remaining: level.quantity,
                })
                .await;
        }

        Ok(StockReservation {
            product_id,
            quantity,
        })
    }

    /// Unconditionally returns `quantity` units to stock. Used for
    /// cancellation/refund compensation; callers are responsible for not
    /// double-restoring the same units.
    #[instrument(skip(self))]
    pub async fn restore(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Restore quantity must be positive".to_string(),
            ));
        }

        let db = &*self.db;

        let result = InventoryLevel::update_many()
            .col_expr(
                inventory_level::Column::Quantity,
                Expr::col(inventory_level::Column::Quantity).add(quantity),
            )
            .col_expr(
                inventory_level::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(inventory_level::Column::ProductId.eq(product_id))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "No inventory record for product {product_id}"
            )));
        }

        counter!("storefront_inventory_restores_total", 1);
        info!(product_id = %product_id, quantity, "Inventory restored");

        self.event_sender
            .send_detached(Event::InventoryRestored {
                product_id,
                quantity,
            })
            .await;

        Ok(())
    }

    /// Admin adjustment: sets the stock level (and optionally the low-stock
    /// threshold), creating the record if missing.
    #[instrument(skip(self))]
    pub async fn set_level(
        &self,
        product_id: Uuid,
        quantity: i32,
        low_stock_threshold: Option<i32>,
    ) -> Result<inventory_level::Model, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Stock level cannot be negative".to_string(),
            ));
        }

        let db = &*self.db;
        let now = chrono::Utc::now();

        let model = inventory_level::ActiveModel {
            product_id: Set(product_id),
            quantity: Set(quantity),
            low_stock_threshold: Set(low_stock_threshold.unwrap_or(0)),
            updated_at: Set(Some(now)),
        };

        let mut on_conflict = OnConflict::column(inventory_level::Column::ProductId);
        on_conflict.update_columns([
            inventory_level::Column::Quantity,
            inventory_level::Column::UpdatedAt,
        ]);
        if low_stock_threshold.is_some() {
            on_conflict.update_column(inventory_level::Column::LowStockThreshold);
        }

        InventoryLevel::insert(model)
            .on_conflict(on_conflict.to_owned())
            .exec_without_returning(db)
            .await?;

        let stored = self
            .get_level(product_id)
            .await?
            .ok_or_else(|| ServiceError::db_error("inventory row missing after upsert"))?;

        info!(product_id = %product_id, quantity = stored.quantity, "Inventory level set");
        Ok(stored)
    }

    /// Current inventory record, if any.
    #[instrument(skip(self))]
    pub async fn get_level(
        &self,
        product_id: Uuid,
    ) -> Result<Option<inventory_level::Model>, ServiceError> {
        let db = &*self.db;
        InventoryLevel::find_by_id(product_id)
            .one(db)
            .await
            .map_err(ServiceError::from)
    }

    /// Available quantity, treating a missing record as zero stock.
    pub async fn available_quantity(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        Ok(self
            .get_level(product_id)
            .await?
            .map(|l| l.quantity)
            .unwrap_or(0))
    }
}
