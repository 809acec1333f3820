//! Persistence for loyalty orders and withdrawals.
//!
//! The [`OrderStore`] and [`WithdrawalStore`] traits are the contracts the
//! reconciliation worker and the balance service call through.
//! [`LedgerStore`] adds the transaction boundary used by withdrawals.
//!
//! Two implementations are provided: [`InMemoryLedgerStore`] for tests and
//! single-process runs, and [`PostgresLedgerStore`] backed by `sqlx`.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{Money, OrderId, OrderState, UserId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryLedgerStore, InMemoryTransaction};
pub use postgres::{PostgresLedgerStore, PostgresTransaction};
pub use record::{OrderRecord, PendingOrder, Withdrawal};
pub use store::{LedgerStore, LedgerTransaction, OrderStore, WithdrawalStore};
