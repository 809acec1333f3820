//! Value types shared by the store, domain, worker and API crates.

pub mod money;
pub mod state;
pub mod types;

pub use money::Money;
pub use state::OrderState;
pub use types::{OrderId, UserId};
