use thiserror::Error;

use crate::{OrderId, OrderState};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order number is already registered (by any user).
    #[error("Order number already registered: {0}")]
    DuplicateOrderNumber(String),

    /// The order does not exist or has already reached a terminal state.
    #[error("Order {0} not found or no longer pending")]
    OrderNotPending(OrderId),

    /// `set_state` was asked for a state it cannot write.
    #[error("Cannot set order state to {0} without an accrual")]
    InvalidStateUpdate(OrderState),

    /// A persisted row could not be mapped back to a domain value.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The store is not reachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
