//! Balance, withdrawal and withdrawal history endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use domain::{Balance, Money};
use ledger_store::{LedgerStore, Withdrawal};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: f64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub current: f64,
    pub withdrawn: f64,
}

impl From<Balance> for BalanceResponse {
    fn from(balance: Balance) -> Self {
        Self {
            current: balance.current.as_decimal(),
            withdrawn: balance.withdrawn.as_decimal(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: f64,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(w: Withdrawal) -> Self {
        Self {
            order: w.order,
            sum: w.sum.as_decimal(),
            processed_at: w.processed_at,
        }
    }
}

/// GET /api/user/balance
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.balance.get_balance(user_id).await?;
    Ok(Json(balance.into()))
}

/// POST /api/user/balance/withdraw: spend points against an order number.
#[tracing::instrument(skip(state, payload))]
pub async fn withdraw<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let sum = Money::from_decimal(req.sum)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid sum {}", req.sum)))?;

    state
        .balance
        .withdraw(user_id, req.order.trim(), sum)
        .await?;
    Ok(StatusCode::OK)
}

/// GET /api/user/withdrawals: newest first; `204` when there are none.
#[tracing::instrument(skip(state))]
pub async fn withdrawals<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let withdrawals = state.balance.list_withdrawals(user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(body).into_response())
}
