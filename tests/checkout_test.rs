mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{checkout_input, line, spawn_app, spawn_app_with};
use storefront_api::entities::order::OrderStatus;
use storefront_api::errors::{codes, ServiceError};

#[tokio::test]
async fn checkout_computes_totals_server_side() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 10).await;

    let outcome = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![line(product, 2, dec!(500))]))
        .await
        .unwrap();

    // 1000 subtotal + 18% tax, flat shipping 0.
    assert_eq!(outcome.amount, dec!(1180.00));
    assert_eq!(outcome.currency, "INR");
    assert!(!outcome.gateway_order_ref.is_empty());

    let order = app
        .services
        .orders
        .require_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.subtotal, dec!(1000));
    assert_eq!(order.tax_amount, dec!(180.00));
    assert_eq!(order.total, dec!(1180.00));

    let items = app
        .services
        .orders
        .get_order_items(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].line_total, dec!(1000));
}

#[tokio::test]
async fn checkout_applies_gift_wrap_fee() {
    let app = spawn_app_with(|cfg| {
        cfg.shipping_flat = 40.0;
        cfg.gift_wrap_fee = 50.0;
    })
    .await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 5).await;

    let mut input = checkout_input(vec![line(product, 1, dec!(100))]);
    input.gift_wrap = true;

    let outcome = app.services.checkout.complete_checkout(input).await.unwrap();
    // 100 + 18 tax + 40 shipping + 50 gift wrap.
    assert_eq!(outcome.amount, dec!(208.00));
}

#[tokio::test]
async fn checkout_rejects_empty_cart() {
    let app = spawn_app().await;
    let err = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn checkout_rejects_disabled_payment_method() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 5).await;

    let mut input = checkout_input(vec![line(product, 1, dec!(100))]);
    input.payment_method = "cheque".to_string();

    let err = app.services.checkout.complete_checkout(input).await.unwrap_err();
    assert_matches!(
        err,
        ServiceError::StateError { code, .. } if code == codes::PAYMENT_METHOD_DISABLED
    );
}

#[tokio::test]
async fn checkout_requires_exactly_one_owner() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 5).await;

    let mut input = checkout_input(vec![line(product, 1, dec!(100))]);
    input.customer_id = Some(Uuid::new_v4());
    // guest_email is already set by the fixture, so both are present.
    let err = app.services.checkout.complete_checkout(input).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn failed_reservation_rolls_back_earlier_lines() {
    let app = spawn_app().await;
    let in_stock = Uuid::new_v4();
    let scarce = Uuid::new_v4();
    app.seed_stock(in_stock, 10).await;
    app.seed_stock(scarce, 1).await;

    let err = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![
            line(in_stock, 3, dec!(100)),
            line(scarce, 2, dec!(100)),
        ]))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock { product_id, available }
            if product_id == scarce && available == 1
    );

    // The first line's reservation must have been restored.
    assert_eq!(
        app.services
            .inventory
            .available_quantity(in_stock)
            .await
            .unwrap(),
        10
    );
}

#[tokio::test]
async fn gateway_failure_keeps_pending_order_and_reservation() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 5).await;
    app.gateway.set_fail_order_creation(true);

    let err = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![line(product, 2, dec!(100))]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::GatewayError(_));

    // The order committed before the gateway call; its reservation stands
    // until reconciliation expires the order.
    let (orders, total) = app.services.orders.list_orders(1, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert_eq!(
        app.services
            .inventory
            .available_quantity(product)
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn payment_intent_reuses_existing_gateway_order() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 5).await;

    let outcome = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![line(product, 1, dec!(100))]))
        .await
        .unwrap();
    assert_eq!(app.gateway.orders_created(), 1);

    // A client that lost the response retries; no second gateway order.
    let retry = app
        .services
        .checkout
        .payment_intent(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(retry.gateway_order_ref, outcome.gateway_order_ref);
    assert_eq!(app.gateway.orders_created(), 1);
}

#[tokio::test]
async fn explicit_coupon_without_engine_is_rejected() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 5).await;

    let mut input = checkout_input(vec![line(product, 1, dec!(100))]);
    input.coupon_code = Some("WELCOME10".to_string());

    let err = app.services.checkout.complete_checkout(input).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    // The rejection happened before any reservation.
    assert_eq!(
        app.services
            .inventory
            .available_quantity(product)
            .await
            .unwrap(),
        5
    );
}

#[tokio::test]
async fn cancelling_a_pending_order_restores_stock() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 5).await;

    let outcome = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![line(product, 2, dec!(100))]))
        .await
        .unwrap();
    assert_eq!(
        app.services
            .inventory
            .available_quantity(product)
            .await
            .unwrap(),
        3
    );

    let order = app
        .services
        .checkout
        .cancel_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(
        app.services
            .inventory
            .available_quantity(product)
            .await
            .unwrap(),
        5
    );
}
