//! Order registration and listing.

use chrono::Utc;
use common::{OrderId, OrderState, UserId};
use ledger_store::{OrderRecord, OrderStore, StoreError};

use crate::error::{LedgerError, Result};
use crate::validation::is_valid_order_number;

/// Outcome of registering an order number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new order was stored in `New` state; the worker will pick it up.
    Created(OrderId),
    /// The caller had already registered this number. Nothing was written.
    AlreadyRegistered,
}

/// Service for registering and listing loyalty orders.
pub struct OrderService<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a new order service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers an order number for a user.
    ///
    /// Re-registering one's own number is a no-op. A number owned by
    /// another user is a `Conflict`.
    #[tracing::instrument(skip(self))]
    pub async fn register_order(&self, user_id: UserId, number: &str) -> Result<Registration> {
        if number.is_empty() {
            return Err(LedgerError::InvalidInput("order number is empty".into()));
        }
        if !is_valid_order_number(number) {
            return Err(LedgerError::InvalidOrderNumber(number.to_string()));
        }

        if let Some(owner) = self.store.find_owner_by_number(number).await? {
            return Self::existing(owner, user_id, number);
        }

        match self
            .store
            .create_order(user_id, number, OrderState::New, Utc::now())
            .await
        {
            Ok(order_id) => {
                tracing::info!(%order_id, "order registered");
                metrics::counter!("ledger_orders_registered_total").increment(1);
                Ok(Registration::Created(order_id))
            }
            // Lost a race with a concurrent registration of the same number.
            Err(StoreError::DuplicateOrderNumber(_)) => {
                match self.store.find_owner_by_number(number).await? {
                    Some(owner) => Self::existing(owner, user_id, number),
                    None => Err(LedgerError::Store(StoreError::DuplicateOrderNumber(
                        number.to_string(),
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lists a user's orders, most recently uploaded first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderRecord>> {
        Ok(self.store.list_orders_by_user(user_id).await?)
    }

    /// Returns one of the user's orders by number.
    ///
    /// Orders belonging to other users are reported as not found.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, user_id: UserId, number: &str) -> Result<OrderRecord> {
        self.store
            .list_orders_by_user(user_id)
            .await?
            .into_iter()
            .find(|o| o.number == number)
            .ok_or_else(|| LedgerError::NotFound(format!("order {number}")))
    }

    fn existing(owner: UserId, user_id: UserId, number: &str) -> Result<Registration> {
        if owner == user_id {
            Ok(Registration::AlreadyRegistered)
        } else {
            Err(LedgerError::Conflict {
                number: number.to_string(),
            })
        }
    }
}
