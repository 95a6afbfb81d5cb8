//! Storefront API Library
//!
//! Order lifecycle and payment settlement for the storefront: checkout,
//! gateway payment confirmation, and refunds, with concurrency-safe
//! inventory reservation underneath.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod openapi;
pub mod services;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::services::audit::AuditService;
use crate::services::checkout::{CheckoutPolicy, CheckoutService};
use crate::services::confirmation::ConfirmationService;
use crate::services::discounts::DiscountResolver;
use crate::services::inventory::InventoryService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;
use crate::services::refunds::{RefundPolicy, RefundService};

/// The service container handed to every handler.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub inventory: Arc<InventoryService>,
    pub payments: Arc<PaymentService>,
    pub checkout: Arc<CheckoutService>,
    pub confirmation: Arc<ConfirmationService>,
    pub refunds: Arc<RefundService>,
    pub audit: AuditService,
}

impl AppServices {
    /// Wires every service against the shared pool, the configured gateway
    /// client, and the discount collaborator.
    pub fn build(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        discounts: Arc<dyn DiscountResolver>,
    ) -> Self {
        let audit = AuditService::new(db.clone());
        let orders = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let inventory = Arc::new(InventoryService::new(db.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::new(db.clone()));
        let checkout = Arc::new(CheckoutService::new(
            orders.clone(),
            inventory.clone(),
            payments.clone(),
            gateway.clone(),
            discounts,
            audit.clone(),
            event_sender.clone(),
            CheckoutPolicy::from_config(config),
        ));
        let confirmation = Arc::new(ConfirmationService::new(
            orders.clone(),
            payments.clone(),
            gateway,
            audit.clone(),
            event_sender.clone(),
            config.payment_signature_secret.clone(),
            config.gateway_name.clone(),
        ));
        let refunds = Arc::new(RefundService::new(
            db,
            orders.clone(),
            payments.clone(),
            inventory.clone(),
            audit.clone(),
            event_sender,
            RefundPolicy {
                window_days: config.refund_window_days,
                auto_settle: config.auto_settle_refunds,
            },
        ));

        Self {
            orders,
            inventory,
            payments,
            checkout,
            confirmation,
            refunds,
            audit,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: AppServices,
}

/// The versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/orders/:id/payment-intent",
            post(handlers::payments::payment_intent),
        )
        .route("/payments/confirm", post(handlers::payments::confirm_payment))
        .route(
            "/orders/:id/refunds",
            post(handlers::refunds::create_refund).get(handlers::refunds::list_refunds),
        )
        .route("/refunds/:id/settle", post(handlers::refunds::settle_refund))
        .route(
            "/inventory",
            post(handlers::inventory::set_inventory),
        )
        .route(
            "/inventory/:product_id",
            get(handlers::inventory::get_inventory),
        )
}

/// Builds the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_v1_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
