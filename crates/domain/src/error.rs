//! Domain error types.

use common::Money;
use ledger_store::StoreError;
use thiserror::Error;

/// Errors returned by order registration and the balance ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed request data (empty order number, non-positive amount).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The order number fails the checksum.
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    /// The order number is registered to a different user.
    #[error("Order number {number} is already registered by another user")]
    Conflict { number: String },

    /// The withdrawal exceeds the current balance.
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Money, available: Money },

    /// A lookup found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store failed; the operation can be retried.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for ledger results.
pub type Result<T> = std::result::Result<T, LedgerError>;
