//! Order state machine.

use serde::{Deserialize, Serialize};

/// The reconciliation state of a loyalty order.
///
/// State transitions:
/// ```text
/// New ──┬──► Processing ──┬──► Accepted
///       │                 └──► Invalid
///       ├──► Accepted
///       └──► Invalid
/// ```
///
/// `Accepted` and `Invalid` are terminal. Only `Accepted` orders carry an
/// accrual amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Registered locally, not yet seen by the accrual provider.
    #[default]
    New,

    /// The provider has the order queued or in progress.
    Processing,

    /// The provider rejected the order (terminal state).
    Invalid,

    /// The provider awarded an accrual (terminal state).
    Accepted,
}

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [OrderState; 4] = [
        OrderState::New,
        OrderState::Processing,
        OrderState::Invalid,
        OrderState::Accepted,
    ];

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Invalid | OrderState::Accepted)
    }

    /// Returns true if the worker still has to poll the provider for this order.
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if moving from `self` to `next` is a forward transition.
    ///
    /// `Processing -> Processing` is allowed, the provider may report the
    /// same intermediate status on consecutive polls.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        match (self, next) {
            (OrderState::New, OrderState::Processing)
            | (OrderState::Processing, OrderState::Processing) => true,
            (OrderState::New | OrderState::Processing, OrderState::Invalid | OrderState::Accepted) => {
                true
            }
            _ => false,
        }
    }

    /// Returns the persisted name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::New => "NEW",
            OrderState::Processing => "PROCESSING",
            OrderState::Invalid => "INVALID",
            OrderState::Accepted => "PROCESSED",
        }
    }

    /// Parses a persisted state name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(OrderState::New),
            "PROCESSING" => Some(OrderState::Processing),
            "INVALID" => Some(OrderState::Invalid),
            "PROCESSED" => Some(OrderState::Accepted),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
