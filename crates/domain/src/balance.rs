//! Balance ledger: derived balances and transactional withdrawals.

use chrono::Utc;
use common::{Money, UserId};
use ledger_store::{LedgerStore, LedgerTransaction, Withdrawal};

use crate::error::{LedgerError, Result};
use crate::validation::is_valid_order_number;

/// A user's balance, recomputed from accepted accruals and withdrawals on
/// every read. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    /// Spendable points: accrued minus withdrawn.
    pub current: Money,
    /// Total ever withdrawn.
    pub withdrawn: Money,
}

/// Service computing balances and performing withdrawals.
pub struct BalanceService<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> BalanceService<S> {
    /// Creates a new balance service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the user's current and withdrawn totals.
    ///
    /// The two sums are read outside a transaction. A concurrent accrual may
    /// or may not be reflected.
    #[tracing::instrument(skip(self))]
    pub async fn get_balance(&self, user_id: UserId) -> Result<Balance> {
        let accrued = self.store.sum_accepted(user_id).await?;
        let withdrawn = self.store.sum_withdrawals(user_id).await?;

        Ok(Balance {
            current: accrued - withdrawn,
            withdrawn,
        })
    }

    /// Spends `sum` points of the user's balance against `order`.
    ///
    /// The balance check and the insert run in one transaction holding the
    /// user's lock: two concurrent withdrawals for the same user never both
    /// see the same balance. On any error nothing is written.
    #[tracing::instrument(skip(self, sum), fields(sum = %sum))]
    pub async fn withdraw(&self, user_id: UserId, order: &str, sum: Money) -> Result<()> {
        if order.is_empty() {
            return Err(LedgerError::InvalidInput("order number is empty".into()));
        }
        if !sum.is_positive() {
            return Err(LedgerError::InvalidInput(format!(
                "withdrawal sum must be positive, got {sum}"
            )));
        }
        if !is_valid_order_number(order) {
            return Err(LedgerError::InvalidOrderNumber(order.to_string()));
        }

        let mut tx = self.store.begin().await?;
        tx.lock_user(user_id).await?;

        let accrued = tx.sum_accepted(user_id).await?;
        let withdrawn = tx.sum_withdrawals(user_id).await?;
        let current = accrued - withdrawn;

        if current < sum {
            tracing::info!(%current, "withdrawal rejected: insufficient funds");
            metrics::counter!("ledger_withdrawals_total", "outcome" => "insufficient_funds")
                .increment(1);
            return Err(LedgerError::InsufficientFunds {
                requested: sum,
                available: current,
            });
        }

        tx.append_withdrawal(Withdrawal::new(user_id, order, sum, Utc::now()))
            .await?;
        tx.commit().await?;

        tracing::info!("withdrawal committed");
        metrics::counter!("ledger_withdrawals_total", "outcome" => "committed").increment(1);
        Ok(())
    }

    /// Lists the user's withdrawals, most recent first.
    #[tracing::instrument(skip(self))]
    pub async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        Ok(self.store.list_withdrawals(user_id).await?)
    }
}
