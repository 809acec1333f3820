//! Client side of the external accrual provider.
//!
//! The provider decides whether a submitted order earns points and how many.
//! It is rate limited and eventually consistent: an order may be unknown for
//! a while after submission, then move through `REGISTERED`/`PROCESSING`
//! before settling on `INVALID` or `PROCESSED`.

pub mod error;
pub mod http;
pub mod memory;
pub mod provider;

pub use error::AccrualError;
pub use http::HttpAccrualClient;
pub use memory::{InMemoryAccrualProvider, ScriptedReply};
pub use provider::{AccrualProvider, AccrualStatus};
