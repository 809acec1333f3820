//! HTTP API server for the loyalty points ledger.
//!
//! Exposes order registration, balance and withdrawal endpoints for
//! authenticated users, plus health and Prometheus metrics endpoints.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{BalanceService, OrderService};
use ledger_store::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: LedgerStore> {
    pub orders: OrderService<S>,
    pub balance: BalanceService<S>,
}

impl<S: LedgerStore + Clone> AppState<S> {
    /// Builds both services over the same store.
    pub fn new(store: S) -> Arc<Self> {
        Arc::new(Self {
            orders: OrderService::new(store.clone()),
            balance: BalanceService::new(store),
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LedgerStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    let user_routes = Router::new()
        .route(
            "/orders",
            post(routes::orders::register::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{number}", get(routes::orders::get::<S>))
        .route("/balance", get(routes::balance::get::<S>))
        .route("/balance/withdraw", post(routes::balance::withdraw::<S>))
        .route("/withdrawals", get(routes::balance::withdrawals::<S>));

    Router::new()
        .route("/health", get(routes::health::check))
        .nest("/api/user", user_routes)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
