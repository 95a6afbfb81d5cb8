pub mod audit;
pub mod checkout;
pub mod confirmation;
pub mod discounts;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod refunds;
