//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::LedgerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed caller identity.
    Unauthorized,
    /// Bad request from the client.
    BadRequest(String),
    /// Ledger operation error.
    Ledger(LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Ledger(err) => ledger_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn ledger_error_to_response(err: LedgerError) -> (StatusCode, String) {
    match &err {
        LedgerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        LedgerError::InvalidOrderNumber(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        LedgerError::Conflict { .. } => (StatusCode::CONFLICT, err.to_string()),
        LedgerError::InsufficientFunds { .. } => (StatusCode::PAYMENT_REQUIRED, err.to_string()),
        LedgerError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        LedgerError::Store(store_err) => {
            tracing::error!(error = %store_err, "store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use ledger_store::StoreError;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_ledger_error_statuses() {
        assert_eq!(
            status_of(LedgerError::InvalidInput("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(LedgerError::InvalidOrderNumber("1".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(LedgerError::Conflict {
                number: "18".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(LedgerError::InsufficientFunds {
                requested: Money::from_cents(2),
                available: Money::from_cents(1),
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(LedgerError::Store(StoreError::Unavailable("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized() {
        assert_eq!(status_of(ApiError::Unauthorized), StatusCode::UNAUTHORIZED);
    }
}
