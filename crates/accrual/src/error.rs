//! Accrual provider error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when querying the accrual provider.
#[derive(Debug, Error)]
pub enum AccrualError {
    /// The provider asked us to back off.
    #[error("Rate limited by accrual provider, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The call did not complete in time.
    #[error("Accrual provider timed out")]
    Timeout,

    /// The configured base address is not a valid URL.
    #[error("Invalid accrual provider address: {0}")]
    InvalidAddress(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a status code outside its contract.
    #[error("Unexpected status code {0} from accrual provider")]
    UnexpectedStatus(u16),

    /// The provider's response body could not be interpreted.
    #[error("Invalid accrual provider response: {0}")]
    InvalidResponse(String),

    /// Any other provider-side failure.
    #[error("Accrual provider error: {0}")]
    Provider(String),
}

/// Convenience type alias for accrual provider results.
pub type Result<T> = std::result::Result<T, AccrualError>;
