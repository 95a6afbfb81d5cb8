use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::inventory_level;
use crate::errors::{ErrorResponse, ServiceError};
use crate::AppState;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InventoryLevelResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    pub low_stock_threshold: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<inventory_level::Model> for InventoryLevelResponse {
    fn from(level: inventory_level::Model) -> Self {
        Self {
            product_id: level.product_id,
            quantity: level.quantity,
            low_stock_threshold: level.low_stock_threshold,
            updated_at: level.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SetInventoryRequest {
    pub product_id: Uuid,
    #[validate(range(min = 0, message = "Stock level cannot be negative"))]
    pub quantity: i32,
    pub low_stock_threshold: Option<i32>,
}

/// Current stock level for a product.
#[utoipa::path(
    get,
    path = "/api/v1/inventory/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Stock level", body = InventoryLevelResponse),
        (status = 404, description = "No inventory record", body = ErrorResponse)
    ),
    tag = "inventory"
)]
pub async fn get_inventory(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<InventoryLevelResponse>, ServiceError> {
    let level = state
        .services
        .inventory
        .get_level(product_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("No inventory record for product {product_id}"))
        })?;
    Ok(Json(level.into()))
}

/// Admin adjustment: sets a product's stock level outright.
#[utoipa::path(
    post,
    path = "/api/v1/inventory",
    request_body = SetInventoryRequest,
    responses(
        (status = 200, description = "Stock level set", body = InventoryLevelResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "inventory"
)]
pub async fn set_inventory(
    State(state): State<AppState>,
    Json(payload): Json<SetInventoryRequest>,
) -> Result<Json<InventoryLevelResponse>, ServiceError> {
    payload.validate()?;
    let level = state
        .services
        .inventory
        .set_level(
            payload.product_id,
            payload.quantity,
            payload.low_stock_threshold,
        )
        .await?;
    Ok(Json(level.into()))
}
