//! Reconciliation of pending orders with the accrual provider.
//!
//! A single [`ReconciliationWorker`] per process polls the store for orders
//! that are not final yet, asks the provider about each one, and records the
//! answer. Polling backs off while there is nothing to do and pauses
//! entirely when the provider rate limits us.

pub mod error;
pub mod schedule;
pub mod worker;

pub use error::ShutdownError;
pub use schedule::PollSchedule;
pub use worker::{PassReport, ReconciliationWorker, WorkerConfig, WorkerHandle};
