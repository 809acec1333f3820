//! Accrual provider contract.

use std::sync::Arc;

use async_trait::async_trait;
use common::Money;

use crate::error::Result;

/// Status of an order as reported by the accrual provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualStatus {
    /// Known to the provider, not yet being processed.
    Registered,
    /// Being processed.
    Processing,
    /// Rejected; will never earn points.
    Invalid,
    /// Final. Always carries an accrual, possibly zero.
    Processed { accrual: Money },
}

impl AccrualStatus {
    /// Returns true once the provider will not change its answer anymore.
    pub fn is_final(&self) -> bool {
        matches!(self, AccrualStatus::Invalid | AccrualStatus::Processed { .. })
    }
}

/// Trait for querying the accrual provider.
#[async_trait]
pub trait AccrualProvider: Send + Sync {
    /// Queries the provider for an order.
    ///
    /// Returns `Ok(None)` when the provider does not know the order (yet),
    /// and `Err(AccrualError::RateLimited)` when it asks callers to pause.
    async fn query(&self, number: &str) -> Result<Option<AccrualStatus>>;
}

#[async_trait]
impl<P: AccrualProvider + ?Sized> AccrualProvider for Arc<P> {
    async fn query(&self, number: &str) -> Result<Option<AccrualStatus>> {
        (**self).query(number).await
    }
}
