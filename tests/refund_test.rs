mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use common::{checkout_input, line, spawn_app, TestApp};
use storefront_api::entities::order::{self, OrderStatus};
use storefront_api::entities::refund::RefundStatus;
use storefront_api::errors::{codes, ServiceError};
use storefront_api::services::checkout::CheckoutOutcome;
use storefront_api::services::confirmation::PaymentConfirmation;
use storefront_api::services::refunds::RefundRequest;

/// Places an order for two units and confirms its payment.
async fn paid_order(app: &TestApp, product: Uuid) -> CheckoutOutcome {
    app.seed_stock(product, 10).await;
    let outcome = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![line(product, 2, dec!(500))]))
        .await
        .unwrap();
    let payment_ref = "gw_pay_1";
    app.services
        .confirmation
        .confirm(PaymentConfirmation {
            order_id: outcome.order_id,
            gateway_order_ref: outcome.gateway_order_ref.clone(),
            gateway_payment_ref: payment_ref.to_string(),
            signature: app.sign(&outcome.gateway_order_ref, payment_ref),
        })
        .await
        .unwrap();
    outcome
}

fn refund_request(order_id: Uuid, amount: Option<rust_decimal::Decimal>) -> RefundRequest {
    RefundRequest {
        order_id,
        amount,
        reason: "Item damaged in transit".to_string(),
        initiated_by: "customer".to_string(),
    }
}

#[tokio::test]
async fn full_refund_settles_and_restores_stock() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;
    assert_eq!(
        app.services
            .inventory
            .available_quantity(product)
            .await
            .unwrap(),
        8
    );

    let refund = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, None))
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Requested);
    assert_eq!(refund.amount, outcome.amount);

    let settled = app
        .services
        .refunds
        .complete_settlement(refund.id, true, Some("gw_refund_1".to_string()))
        .await
        .unwrap();
    assert_eq!(settled.status, RefundStatus::Succeeded);
    assert_eq!(settled.gateway_refund_id.as_deref(), Some("gw_refund_1"));

    let order = app
        .services
        .orders
        .require_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(
        app.services
            .inventory
            .available_quantity(product)
            .await
            .unwrap(),
        10
    );
}

#[tokio::test]
async fn partial_refunds_respect_the_payment_bound() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    // Total is 1180.00; two partials within the bound, a third over it.
    app.services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(700))))
        .await
        .unwrap();
    app.services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(400))))
        .await
        .unwrap();

    let err = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(100))))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::StateError { code, .. } if code == codes::REFUND_AMOUNT_EXCEEDED
    );
}

#[tokio::test]
async fn concurrent_partial_refunds_cannot_overdraw_the_payment() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    // 700 + 600 would exceed the 1180.00 payment; only one may land.
    let first = tokio::spawn({
        let refunds = app.services.refunds.clone();
        let order_id = outcome.order_id;
        async move {
            refunds
                .create_refund(refund_request(order_id, Some(dec!(700))))
                .await
        }
    });
    let second = tokio::spawn({
        let refunds = app.services.refunds.clone();
        let order_id = outcome.order_id;
        async move {
            refunds
                .create_refund(refund_request(order_id, Some(dec!(600))))
                .await
        }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert_matches!(
        err,
        ServiceError::StateError { code, .. } if code == codes::REFUND_AMOUNT_EXCEEDED
    );
}

#[tokio::test]
async fn partial_refund_leaves_order_status_unchanged() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    let refund = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(200))))
        .await
        .unwrap();
    app.services
        .refunds
        .complete_settlement(refund.id, true, None)
        .await
        .unwrap();

    let order = app
        .services
        .orders
        .require_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    // Partial refunds do not restore stock.
    assert_eq!(
        app.services
            .inventory
            .available_quantity(product)
            .await
            .unwrap(),
        8
    );
}

#[tokio::test]
async fn duplicate_amount_refunds_are_rejected() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    app.services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(300))))
        .await
        .unwrap();

    let err = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(300))))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::Conflict { code, .. } if code == codes::DUPLICATE_REFUND
    );
}

#[tokio::test]
async fn failed_settlement_frees_the_amount_for_retry() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    let first = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(300))))
        .await
        .unwrap();
    let failed = app
        .services
        .refunds
        .complete_settlement(first.id, false, None)
        .await
        .unwrap();
    assert_eq!(failed.status, RefundStatus::Failed);

    // The failed row no longer counts as a duplicate or toward the bound.
    let retry = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(300))))
        .await
        .unwrap();
    assert_eq!(retry.status, RefundStatus::Requested);

    // The order is untouched by the failure.
    let order = app
        .services
        .orders
        .require_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn refund_window_is_enforced() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    // Age the order past the 30-day window.
    order::Entity::update_many()
        .col_expr(
            order::Column::PlacedAt,
            Expr::value(Utc::now() - Duration::days(45)),
        )
        .filter(order::Column::Id.eq(outcome.order_id))
        .exec(&*app.db)
        .await
        .unwrap();

    let err = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(100))))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::StateError { code, .. } if code == codes::REFUND_WINDOW_EXPIRED
    );
}

#[tokio::test]
async fn refund_on_the_last_window_day_is_accepted() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    // Exactly windowDays (30) elapsed: still allowed.
    order::Entity::update_many()
        .col_expr(
            order::Column::PlacedAt,
            Expr::value(Utc::now() - Duration::days(30)),
        )
        .filter(order::Column::Id.eq(outcome.order_id))
        .exec(&*app.db)
        .await
        .unwrap();

    let refund = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(100))))
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Requested);
}

#[tokio::test]
async fn refund_window_anchors_on_delivery() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    // Placed long ago but delivered recently: still inside the window.
    order::Entity::update_many()
        .col_expr(
            order::Column::PlacedAt,
            Expr::value(Utc::now() - Duration::days(90)),
        )
        .col_expr(
            order::Column::DeliveredAt,
            Expr::value(Some(Utc::now() - Duration::days(5))),
        )
        .filter(order::Column::Id.eq(outcome.order_id))
        .exec(&*app.db)
        .await
        .unwrap();

    let refund = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(100))))
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Requested);
}

#[tokio::test]
async fn refunds_require_a_completed_payment() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    app.seed_stock(product, 10).await;

    // Checkout without confirming the payment.
    let outcome = app
        .services
        .checkout
        .complete_checkout(checkout_input(vec![line(product, 1, dec!(500))]))
        .await
        .unwrap();

    let err = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, None))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::StateError { code, .. } if code == codes::PAYMENT_NOT_COMPLETED
    );
}

#[tokio::test]
async fn settlement_replay_is_idempotent() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    let refund = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, None))
        .await
        .unwrap();
    let first = app
        .services
        .refunds
        .complete_settlement(refund.id, true, Some("gw_refund_1".to_string()))
        .await
        .unwrap();
    let replay = app
        .services
        .refunds
        .complete_settlement(refund.id, true, Some("gw_refund_1".to_string()))
        .await
        .unwrap();
    assert_eq!(first.status, replay.status);

    // Flipping an already-succeeded refund to failed is rejected.
    let err = app
        .services
        .refunds
        .complete_settlement(refund.id, false, None)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::StateError { code, .. } if code == codes::INVALID_STATUS
    );
}

#[tokio::test]
async fn processing_transition_is_tracked() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    let refund = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(100))))
        .await
        .unwrap();
    let processing = app
        .services
        .refunds
        .mark_processing(refund.id)
        .await
        .unwrap();
    assert_eq!(processing.status, RefundStatus::Processing);

    // Repeating the call is a no-op.
    let again = app.services.refunds.mark_processing(refund.id).await.unwrap();
    assert_eq!(again.status, RefundStatus::Processing);
}

#[tokio::test]
async fn refund_amount_must_be_positive() {
    let app = spawn_app().await;
    let product = Uuid::new_v4();
    let outcome = paid_order(&app, product).await;

    let err = app
        .services
        .refunds
        .create_refund(refund_request(outcome.order_id, Some(dec!(0))))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .refunds
        .create_refund(RefundRequest {
            order_id: outcome.order_id,
            amount: Some(dec!(100)),
            reason: "  ".to_string(),
            initiated_by: "customer".to_string(),
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
