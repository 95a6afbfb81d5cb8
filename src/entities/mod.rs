pub mod audit_log;
pub mod inventory_level;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod refund;
