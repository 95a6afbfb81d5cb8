use utoipa::OpenApi;

use crate::errors::ErrorResponse;
use crate::handlers;

/// OpenAPI document for the storefront API.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::checkout::checkout,
        handlers::orders::get_order,
        handlers::orders::list_orders,
        handlers::orders::cancel_order,
        handlers::payments::confirm_payment,
        handlers::payments::payment_intent,
        handlers::refunds::create_refund,
        handlers::refunds::list_refunds,
        handlers::refunds::settle_refund,
        handlers::inventory::get_inventory,
        handlers::inventory::set_inventory,
        handlers::health::health,
    ),
    components(schemas(
        ErrorResponse,
        handlers::AddressDto,
        handlers::PaymentIntentResponse,
        handlers::checkout::CheckoutRequest,
        handlers::checkout::CheckoutItemDto,
        handlers::orders::OrderResponse,
        handlers::orders::OrderItemResponse,
        handlers::orders::OrderListResponse,
        handlers::payments::ConfirmPaymentRequest,
        handlers::payments::ConfirmPaymentResponse,
        handlers::refunds::CreateRefundRequest,
        handlers::refunds::SettleRefundRequest,
        handlers::refunds::RefundResponse,
        handlers::inventory::InventoryLevelResponse,
        handlers::inventory::SetInventoryRequest,
        handlers::health::HealthResponse,
    )),
    tags(
        (name = "checkout", description = "Cart to order"),
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "Gateway payment confirmation"),
        (name = "refunds", description = "Refund intake and settlement"),
        (name = "inventory", description = "Stock levels"),
        (name = "health", description = "Service health")
    ),
    info(
        title = "Storefront API",
        description = "Order lifecycle and payment settlement service"
    )
)]
pub struct ApiDoc;
