use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{
    Money, OrderId, OrderRecord, OrderState, PendingOrder, Result, StoreError, UserId, Withdrawal,
    store::{LedgerStore, LedgerTransaction, OrderStore, WithdrawalStore},
};

#[derive(Debug, Default)]
struct LedgerState {
    /// Insertion order; ties on `uploaded_at` keep it.
    orders: Vec<OrderRecord>,
    withdrawals: Vec<Withdrawal>,
}

impl LedgerState {
    fn sum_accepted(&self, user_id: UserId) -> Money {
        self.orders
            .iter()
            .filter(|o| o.user_id == user_id && o.state == OrderState::Accepted)
            .filter_map(|o| o.accrual)
            .sum()
    }

    fn sum_withdrawals(&self, user_id: UserId) -> Money {
        self.withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.sum)
            .sum()
    }

    /// The order, if it may move to `next` from its current state.
    fn pending_order_mut(&mut self, order_id: OrderId, next: OrderState) -> Result<&mut OrderRecord> {
        self.orders
            .iter_mut()
            .find(|o| o.id == order_id && o.state.can_transition_to(next))
            .ok_or(StoreError::OrderNotPending(order_id))
    }
}

/// In-memory ledger store for tests and single-process runs.
///
/// Transactions take the write half of a single lock for their whole
/// lifetime, so they are serialized against each other and against all
/// other writes. Withdrawals appended inside a transaction are buffered and
/// only become visible on commit.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `StoreError::Unavailable`
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the total number of withdrawals stored.
    pub async fn withdrawal_count(&self) -> usize {
        self.state.read().await.withdrawals.len()
    }

    /// Looks up an order by its number.
    pub async fn find_order(&self, number: &str) -> Option<OrderRecord> {
        self.state
            .read()
            .await
            .orders
            .iter()
            .find(|o| o.number == number)
            .cloned()
    }

    fn check_available(&self) -> Result<()> {
        check_available(&self.unavailable)
    }
}

fn check_available(flag: &AtomicBool) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("in-memory store switched off".into()));
    }
    Ok(())
}

#[async_trait]
impl OrderStore for InMemoryLedgerStore {
    async fn create_order(
        &self,
        user_id: UserId,
        number: &str,
        state: OrderState,
        uploaded_at: DateTime<Utc>,
    ) -> Result<OrderId> {
        self.check_available()?;
        if state == OrderState::Accepted {
            return Err(StoreError::InvalidStateUpdate(state));
        }

        let mut store = self.state.write().await;
        if store.orders.iter().any(|o| o.number == number) {
            return Err(StoreError::DuplicateOrderNumber(number.to_string()));
        }

        let id = OrderId::new();
        store.orders.push(OrderRecord {
            id,
            user_id,
            number: number.to_string(),
            state,
            accrual: None,
            uploaded_at,
        });
        Ok(id)
    }

    async fn find_owner_by_number(&self, number: &str) -> Result<Option<UserId>> {
        self.check_available()?;
        let store = self.state.read().await;
        Ok(store
            .orders
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.user_id))
    }

    async fn list_orders_by_user(&self, user_id: UserId) -> Result<Vec<OrderRecord>> {
        self.check_available()?;
        let store = self.state.read().await;
        let mut orders: Vec<_> = store
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        // Newest first; among equal timestamps the later insert comes first.
        orders.reverse();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    async fn fetch_pending_batch(&self, limit: usize) -> Result<Vec<PendingOrder>> {
        self.check_available()?;
        let store = self.state.read().await;
        let mut pending: Vec<_> = store
            .orders
            .iter()
            .filter(|o| o.state.is_pending())
            .collect();
        pending.sort_by_key(|o| o.uploaded_at);

        Ok(pending
            .into_iter()
            .take(limit)
            .map(|o| PendingOrder {
                id: o.id,
                number: o.number.clone(),
                user_id: o.user_id,
            })
            .collect())
    }

    async fn set_state(&self, order_id: OrderId, state: OrderState) -> Result<()> {
        self.check_available()?;
        if matches!(state, OrderState::New | OrderState::Accepted) {
            return Err(StoreError::InvalidStateUpdate(state));
        }

        let mut store = self.state.write().await;
        let order = store.pending_order_mut(order_id, state)?;
        order.state = state;
        Ok(())
    }

    async fn set_state_accepted(&self, order_id: OrderId, accrual: Money) -> Result<()> {
        self.check_available()?;
        let mut store = self.state.write().await;
        let order = store.pending_order_mut(order_id, OrderState::Accepted)?;
        order.state = OrderState::Accepted;
        order.accrual = Some(accrual);
        Ok(())
    }
}

#[async_trait]
impl WithdrawalStore for InMemoryLedgerStore {
    async fn sum_accepted(&self, user_id: UserId) -> Result<Money> {
        self.check_available()?;
        Ok(self.state.read().await.sum_accepted(user_id))
    }

    async fn sum_withdrawals(&self, user_id: UserId) -> Result<Money> {
        self.check_available()?;
        Ok(self.state.read().await.sum_withdrawals(user_id))
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        self.check_available()?;
        let store = self.state.read().await;
        let mut withdrawals: Vec<_> = store
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        withdrawals.reverse();
        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        self.check_available()?;
        let guard = Arc::clone(&self.state).write_owned().await;
        Ok(InMemoryTransaction {
            guard,
            pending: Vec::new(),
            unavailable: Arc::clone(&self.unavailable),
        })
    }
}

/// Transaction over [`InMemoryLedgerStore`].
pub struct InMemoryTransaction {
    guard: OwnedRwLockWriteGuard<LedgerState>,
    pending: Vec<Withdrawal>,
    unavailable: Arc<AtomicBool>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_user(&mut self, _user_id: UserId) -> Result<()> {
        // The write guard held since `begin` already excludes everyone.
        check_available(&self.unavailable)
    }

    async fn sum_accepted(&mut self, user_id: UserId) -> Result<Money> {
        check_available(&self.unavailable)?;
        Ok(self.guard.sum_accepted(user_id))
    }

    async fn sum_withdrawals(&mut self, user_id: UserId) -> Result<Money> {
        check_available(&self.unavailable)?;
        let buffered: Money = self
            .pending
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.sum)
            .sum();
        Ok(self.guard.sum_withdrawals(user_id) + buffered)
    }

    async fn append_withdrawal(&mut self, withdrawal: Withdrawal) -> Result<()> {
        check_available(&self.unavailable)?;
        self.pending.push(withdrawal);
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        check_available(&self.unavailable)?;
        let pending = std::mem::take(&mut self.pending);
        self.guard.withdrawals.extend(pending);
        Ok(())
    }
}
