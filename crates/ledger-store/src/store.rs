use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Money, OrderId, OrderRecord, OrderState, PendingOrder, Result, UserId, Withdrawal};

/// Persistence contract for loyalty orders.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Registers a new order and returns its id.
    ///
    /// Fails with `DuplicateOrderNumber` if the number is already taken,
    /// regardless of which user owns it.
    async fn create_order(
        &self,
        user_id: UserId,
        number: &str,
        state: OrderState,
        uploaded_at: DateTime<Utc>,
    ) -> Result<OrderId>;

    /// Returns the owner of an order number, or None if it is not registered.
    async fn find_owner_by_number(&self, number: &str) -> Result<Option<UserId>>;

    /// Lists a user's orders, most recently uploaded first.
    async fn list_orders_by_user(&self, user_id: UserId) -> Result<Vec<OrderRecord>>;

    /// Fetches up to `limit` orders in `New` or `Processing` state, oldest first.
    async fn fetch_pending_batch(&self, limit: usize) -> Result<Vec<PendingOrder>>;

    /// Moves a pending order to `Processing` or `Invalid`.
    ///
    /// Orders already in a terminal state are never rewritten; the call fails
    /// with `OrderNotPending` instead.
    async fn set_state(&self, order_id: OrderId, state: OrderState) -> Result<()>;

    /// Moves a pending order to `Accepted`, recording the accrual in the same write.
    async fn set_state_accepted(&self, order_id: OrderId, accrual: Money) -> Result<()>;
}

/// Read side of the ledger: aggregates over withdrawals and accepted orders.
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Sum of accruals of the user's `Accepted` orders.
    async fn sum_accepted(&self, user_id: UserId) -> Result<Money>;

    /// Sum of all the user's withdrawals.
    async fn sum_withdrawals(&self, user_id: UserId) -> Result<Money>;

    /// Lists a user's withdrawals, most recent first.
    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>>;
}

/// A store that can open transactions spanning the balance check and the
/// withdrawal insert.
#[async_trait]
pub trait LedgerStore: OrderStore + WithdrawalStore {
    type Tx: LedgerTransaction;

    /// Begins a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// Operations available inside a withdrawal transaction.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Serializes this transaction against every other transaction that locks
    /// the same user, until commit or rollback.
    async fn lock_user(&mut self, user_id: UserId) -> Result<()>;

    async fn sum_accepted(&mut self, user_id: UserId) -> Result<Money>;

    /// Sum of the user's withdrawals, including ones appended in this transaction.
    async fn sum_withdrawals(&mut self, user_id: UserId) -> Result<Money>;

    async fn append_withdrawal(&mut self, withdrawal: Withdrawal) -> Result<()>;

    /// Makes every write of this transaction visible atomically.
    async fn commit(self) -> Result<()>;
}
