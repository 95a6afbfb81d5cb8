use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::entities::{order, order_item};
use crate::errors::{ErrorResponse, ServiceError};
use crate::AppState;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: String,
    pub currency: String,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub coupon_discount: Decimal,
    #[schema(value_type = String)]
    pub loyalty_discount: Decimal,
    #[schema(value_type = String)]
    pub tax_amount: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub payment_method: String,
    pub gift_wrap: bool,
    pub gateway_order_ref: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    fn from_model(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status.to_string(),
            currency: order.currency,
            subtotal: order.subtotal,
            coupon_discount: order.coupon_discount,
            loyalty_discount: order.loyalty_discount,
            tax_amount: order.tax_amount,
            shipping_cost: order.shipping_cost,
            total: order.total,
            payment_method: order.payment_method,
            gift_wrap: order.gift_wrap,
            gateway_order_ref: order.gateway_order_ref,
            placed_at: order.placed_at,
            delivered_at: order.delivered_at,
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    /// 1-based page number.
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Fetches one order with its line items.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order = state.services.orders.require_order(id).await?;
    let items = state.services.orders.get_order_items(id).await?;
    Ok(Json(OrderResponse::from_model(order, items)))
}

/// Lists orders, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Page of orders", body = OrderListResponse),
        (status = 400, description = "Invalid pagination", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(50);
    let (orders, total) = state.services.orders.list_orders(page, limit).await?;
    Ok(Json(OrderListResponse {
        orders: orders
            .into_iter()
            .map(|o| OrderResponse::from_model(o, Vec::new()))
            .collect(),
        total,
        page,
        limit,
    }))
}

/// Cancels a pending order and returns its reserved stock.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = OrderResponse),
        (status = 404, description = "Order not found", body = ErrorResponse),
        (status = 422, description = "Order is not cancellable", body = ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order = state.services.checkout.cancel_order(id).await?;
    Ok(Json(OrderResponse::from_model(order, Vec::new())))
}
