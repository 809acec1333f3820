//! Domain layer of the loyalty ledger.
//!
//! This crate provides:
//! - Order number validation (mod-10 checksum)
//! - `OrderService` for registering and listing a user's orders
//! - `BalanceService` for balances and transactional withdrawals

pub mod balance;
pub mod error;
pub mod order;
pub mod validation;

pub use balance::{Balance, BalanceService};
pub use common::{Money, OrderId, OrderState, UserId};
pub use error::LedgerError;
pub use order::{OrderService, Registration};
pub use validation::is_valid_order_number;
