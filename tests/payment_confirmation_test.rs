mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use common::{checkout_input, line, spawn_app, TestApp};
use storefront_api::entities::order::OrderStatus;
use storefront_api::entities::payment::{self, PaymentStatus};
use storefront_api::errors::{codes, ServiceError};
use storefront_api::gateway::GatewayPaymentStatus;
use storefront_api::services::checkout::CheckoutOutcome;
use storefront_api::services::confirmation::PaymentConfirmation;

async fn place_order(app: &TestApp) -> CheckoutOutcome {
    let product = Uuid::new_v4();
    app.seed_stock(product, 10).await;
    app.services
        .checkout
        .complete_checkout(checkout_input(vec![line(product, 2, dec!(500))]))
        .await
        .unwrap()
}

fn confirmation_for(app: &TestApp, outcome: &CheckoutOutcome, payment_ref: &str) -> PaymentConfirmation {
    PaymentConfirmation {
        order_id: outcome.order_id,
        gateway_order_ref: outcome.gateway_order_ref.clone(),
        gateway_payment_ref: payment_ref.to_string(),
        signature: app.sign(&outcome.gateway_order_ref, payment_ref),
    }
}

#[tokio::test]
async fn confirmation_marks_order_paid() {
    let app = spawn_app().await;
    let outcome = place_order(&app).await;

    let result = app
        .services
        .confirmation
        .confirm(confirmation_for(&app, &outcome, "gw_pay_1"))
        .await
        .unwrap();

    assert!(!result.idempotent_replay);
    assert_eq!(result.order_status, OrderStatus::Paid);
    assert_eq!(result.payment_status, PaymentStatus::Completed);

    let payment = app
        .services
        .payments
        .require_by_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(payment.amount, outcome.amount);
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("gw_pay_1"));
}

#[tokio::test]
async fn duplicate_confirmation_is_absorbed() {
    let app = spawn_app().await;
    let outcome = place_order(&app).await;
    let confirmation = confirmation_for(&app, &outcome, "gw_pay_1");

    let first = app
        .services
        .confirmation
        .confirm(confirmation.clone())
        .await
        .unwrap();
    let second = app
        .services
        .confirmation
        .confirm(confirmation)
        .await
        .unwrap();

    assert!(!first.idempotent_replay);
    assert!(second.idempotent_replay);
    assert_eq!(first.payment_id, second.payment_id);

    // Exactly one payment row for the order.
    let count = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(outcome.order_id))
        .count(&*app.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn tampered_signature_is_rejected_without_state_change() {
    let app = spawn_app().await;
    let outcome = place_order(&app).await;

    let mut confirmation = confirmation_for(&app, &outcome, "gw_pay_1");
    // Signature was computed over a different payment reference.
    confirmation.gateway_payment_ref = "gw_pay_other".to_string();

    let err = app
        .services
        .confirmation
        .confirm(confirmation)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::SignatureMismatch);

    let order = app
        .services
        .orders
        .require_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    let payment = app
        .services
        .payments
        .require_by_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn mismatched_gateway_order_ref_conflicts() {
    let app = spawn_app().await;
    let outcome = place_order(&app).await;

    let confirmation = PaymentConfirmation {
        order_id: outcome.order_id,
        gateway_order_ref: "gw_order_forged".to_string(),
        gateway_payment_ref: "gw_pay_1".to_string(),
        signature: app.sign("gw_order_forged", "gw_pay_1"),
    };

    let err = app
        .services
        .confirmation
        .confirm(confirmation)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::Conflict { code, .. } if code == codes::GATEWAY_REF_MISMATCH
    );
}

#[tokio::test]
async fn unsuccessful_gateway_status_blocks_confirmation() {
    let app = spawn_app().await;
    let outcome = place_order(&app).await;
    app.gateway
        .set_payment_status(GatewayPaymentStatus::Failed);

    let err = app
        .services
        .confirmation
        .confirm(confirmation_for(&app, &outcome, "gw_pay_1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::GatewayError(_));

    let order = app
        .services
        .orders
        .require_order(outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn authorized_payments_are_accepted() {
    let app = spawn_app().await;
    let outcome = place_order(&app).await;
    app.gateway
        .set_payment_status(GatewayPaymentStatus::Authorized);

    let result = app
        .services
        .confirmation
        .confirm(confirmation_for(&app, &outcome, "gw_pay_1"))
        .await
        .unwrap();
    assert_eq!(result.order_status, OrderStatus::Paid);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = spawn_app().await;
    let confirmation = PaymentConfirmation {
        order_id: Uuid::new_v4(),
        gateway_order_ref: "gw_order_x".to_string(),
        gateway_payment_ref: "gw_pay_x".to_string(),
        signature: app.sign("gw_order_x", "gw_pay_x"),
    };
    let err = app
        .services
        .confirmation
        .confirm(confirmation)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
