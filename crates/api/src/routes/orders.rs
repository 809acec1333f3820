//! Order registration and listing endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use domain::Registration;
use ledger_store::{LedgerStore, OrderRecord};
use serde::Serialize;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<OrderRecord> for OrderResponse {
    fn from(order: OrderRecord) -> Self {
        Self {
            number: order.number,
            status: order.state.as_str(),
            accrual: order.accrual.map(|m| m.as_decimal()),
            uploaded_at: order.uploaded_at,
        }
    }
}

/// POST /api/user/orders: register an order number sent as the plain-text body.
///
/// `202` for a new order, `200` when the caller already registered it.
#[tracing::instrument(skip(state, body))]
pub async fn register<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    body: String,
) -> Result<StatusCode, ApiError> {
    let number = body.trim();
    match state.orders.register_order(user_id, number).await? {
        Registration::Created(_) => Ok(StatusCode::ACCEPTED),
        Registration::AlreadyRegistered => Ok(StatusCode::OK),
    }
}

/// GET /api/user/orders: the caller's orders, newest first; `204` when there are none.
#[tracing::instrument(skip(state))]
pub async fn list<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let orders = state.orders.list_orders(user_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}

/// GET /api/user/orders/{number}: one of the caller's orders; `404` when the
/// caller has not registered it.
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(number): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.orders.get_order(user_id, &number).await?;
    Ok(Json(order.into()))
}
