//! Worker lifecycle errors.

use std::time::Duration;

use thiserror::Error;

/// Errors reported while waiting for the worker to stop.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The worker was still running when the deadline passed.
    #[error("Reconciliation worker did not stop within {0:?}")]
    Timeout(Duration),

    /// The worker task panicked or was aborted.
    #[error("Reconciliation worker task failed: {0}")]
    Join(String),
}
