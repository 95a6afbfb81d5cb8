#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ConnectOptions, Database};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use storefront_api::config::AppConfig;
use storefront_api::db::{self, DbPool};
use storefront_api::errors::ServiceError;
use storefront_api::events;
use storefront_api::gateway::{
    GatewayOrder, GatewayPayment, GatewayPaymentStatus, PaymentGateway,
};
use storefront_api::services::discounts::NoDiscounts;
use storefront_api::services::orders::NewOrderLine;
use storefront_api::{AppServices, AppState};

/// Deterministic in-process stand-in for the payment gateway.
///
/// Counts order creations and serves a configurable payment status, so
/// tests can assert both on outcomes and on how many processor-side orders
/// a flow created.
pub struct StubGateway {
    pub orders_created: AtomicUsize,
    payment_status: Mutex<GatewayPaymentStatus>,
    fail_order_creation: Mutex<bool>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            orders_created: AtomicUsize::new(0),
            payment_status: Mutex::new(GatewayPaymentStatus::Captured),
            fail_order_creation: Mutex::new(false),
        }
    }

    pub fn set_payment_status(&self, status: GatewayPaymentStatus) {
        *self.payment_status.lock().unwrap() = status;
    }

    pub fn set_fail_order_creation(&self, fail: bool) {
        *self.fail_order_creation.lock().unwrap() = fail;
    }

    pub fn orders_created(&self) -> usize {
        self.orders_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_gateway_order(
        &self,
        _amount: Decimal,
        _currency: &str,
        reference: &str,
        _notes: Option<serde_json::Value>,
    ) -> Result<GatewayOrder, ServiceError> {
        if *self.fail_order_creation.lock().unwrap() {
            return Err(ServiceError::GatewayError(
                "stub gateway is down".to_string(),
            ));
        }
        let n = self.orders_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            gateway_order_id: format!("gw_order_{reference}_{n}"),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        let status = self.payment_status.lock().unwrap().clone();
        Ok(GatewayPayment {
            status: status.clone(),
            raw: json!({ "id": payment_id, "status": status.to_string() }),
        })
    }
}

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub services: AppServices,
    pub gateway: Arc<StubGateway>,
}

/// Fresh sqlite-backed application with every service wired against the
/// stub gateway. A single pooled connection keeps the in-memory database
/// alive and shared across tasks.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut AppConfig)) -> TestApp {
    let mut config = AppConfig::for_tests("sqlite::memory:");
    customize(&mut config);

    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(1).sqlx_logging(false);
    let db = Arc::new(Database::connect(opt).await.expect("sqlite connect"));
    db::init_schema(&db).await.expect("schema init");

    let (event_sender, event_receiver) = events::channel(256);
    tokio::spawn(events::process_events(event_receiver));

    let gateway = Arc::new(StubGateway::new());
    let services = AppServices::build(
        db.clone(),
        &config,
        event_sender,
        gateway.clone(),
        Arc::new(NoDiscounts),
    );

    TestApp {
        db,
        config,
        services,
        gateway,
    }
}

impl TestApp {
    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: Arc::new(self.config.clone()),
            event_sender: storefront_api::events::channel(16).0,
            services: self.services.clone(),
        }
    }

    pub async fn seed_stock(&self, product_id: Uuid, quantity: i32) {
        self.services
            .inventory
            .set_level(product_id, quantity, Some(2))
            .await
            .expect("seed stock");
    }

    /// Signs a confirmation the way the gateway callback would.
    pub fn sign(&self, order_ref: &str, payment_ref: &str) -> String {
        storefront_api::services::confirmation::sign_confirmation(
            &self.config.payment_signature_secret,
            order_ref,
            payment_ref,
        )
    }
}

pub fn line(product_id: Uuid, quantity: i32, unit_price: Decimal) -> NewOrderLine {
    NewOrderLine {
        product_id,
        name: "Test product".to_string(),
        quantity,
        unit_price,
    }
}

pub fn shipping_address() -> serde_json::Value {
    json!({
        "name": "Asha Rao",
        "street": "14 MG Road",
        "city": "Bengaluru",
        "state": "KA",
        "postal_code": "560001",
        "country": "IN"
    })
}

pub fn checkout_input(
    lines: Vec<NewOrderLine>,
) -> storefront_api::services::checkout::CheckoutInput {
    storefront_api::services::checkout::CheckoutInput {
        customer_id: None,
        guest_email: Some("buyer@example.com".to_string()),
        payment_method: "card".to_string(),
        lines,
        coupon_code: None,
        redeem_points: None,
        shipping_address: shipping_address(),
        billing_address: None,
        gift_wrap: false,
    }
}
