//! Rows exchanged with the store.

use chrono::{DateTime, Utc};

use crate::{Money, OrderId, OrderState, UserId};

/// A loyalty order as listed to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub number: String,
    pub state: OrderState,
    /// Present if and only if `state` is `Accepted`.
    pub accrual: Option<Money>,
    pub uploaded_at: DateTime<Utc>,
}

/// The slice of an order the reconciliation worker needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    pub id: OrderId,
    pub number: String,
    pub user_id: UserId,
}

/// A point withdrawal. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub user_id: UserId,
    /// Order number the points were spent on. A label, not a reference to an
    /// order row.
    pub order: String,
    pub sum: Money,
    pub processed_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn new(
        user_id: UserId,
        order: impl Into<String>,
        sum: Money,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            order: order.into(),
            sum,
            processed_at,
        }
    }
}
