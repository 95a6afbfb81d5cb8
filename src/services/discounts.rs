use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::services::orders::NewOrderLine;

/// Combined discount result from the coupon and loyalty engines.
#[derive(Debug, Clone, Default)]
pub struct DiscountBreakdown {
    pub coupon_discount: Decimal,
    pub loyalty_discount: Decimal,
}

/// Failures from the discount collaborator.
///
/// `InvalidCoupon` is fatal to checkout when the buyer explicitly supplied
/// the code. `Unavailable` is not fatal: the orchestrator proceeds with
/// zero discount.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscountError {
    #[error("Invalid coupon code: {0}")]
    InvalidCoupon(String),
    #[error("Discount engine unavailable: {0}")]
    Unavailable(String),
}

/// External collaborator combining coupon and loyalty-point results.
/// Must be callable with no code and no buyer, returning zero discount.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscountResolver: Send + Sync {
    async fn resolve<'a>(
        &self,
        coupon_code: Option<&'a str>,
        customer_id: Option<Uuid>,
        redeem_points: Option<i64>,
        order_amount: Decimal,
        lines: &[NewOrderLine],
    ) -> Result<DiscountBreakdown, DiscountError>;
}

/// Resolver used when no discount engines are wired in.
#[derive(Debug, Clone, Default)]
pub struct NoDiscounts;

#[async_trait]
impl DiscountResolver for NoDiscounts {
    async fn resolve(
        &self,
        coupon_code: Option<&str>,
        _customer_id: Option<Uuid>,
        _redeem_points: Option<i64>,
        _order_amount: Decimal,
        _lines: &[NewOrderLine],
    ) -> Result<DiscountBreakdown, DiscountError> {
        // A buyer-supplied code cannot be honored without an engine.
        if let Some(code) = coupon_code {
            return Err(DiscountError::InvalidCoupon(code.to_string()));
        }
        Ok(DiscountBreakdown {
            coupon_discount: dec!(0),
            loyalty_discount: dec!(0),
        })
    }
}
