//! API server entry point.

use accrual::HttpAccrualClient;
use api::config::{Config, LogFormat};
use ledger_store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use metrics_exporter_prometheus::PrometheusHandle;
use reconciler::{ReconciliationWorker, WorkerHandle};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const MAX_DB_CONNECTIONS: u32 = 10;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Starts the reconciliation worker if an accrual provider is configured.
fn start_worker<S: LedgerStore + Clone + 'static>(
    store: &S,
    config: &Config,
    token: &CancellationToken,
) -> Option<WorkerHandle> {
    let Some(address) = config.accrual_address.as_deref() else {
        tracing::warn!("ACCRUAL_SYSTEM_ADDRESS not set, reconciliation worker disabled");
        return None;
    };

    let worker_config = config.worker_config();
    let client = HttpAccrualClient::with_timeout(address, worker_config.request_timeout)
        .expect("invalid ACCRUAL_SYSTEM_ADDRESS");
    tracing::info!(%address, "starting reconciliation worker");
    Some(ReconciliationWorker::new(store.clone(), client, worker_config).spawn(token.clone()))
}

/// Serves HTTP until a shutdown signal, then stops the worker.
async fn serve<S: LedgerStore + Clone + 'static>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) {
    let token = CancellationToken::new();
    let worker = start_worker(&store, config, &token);

    let app = api::create_app(api::AppState::new(store), metrics_handle);

    tracing::info!(addr = %config.run_address, "starting API server");
    let listener = tokio::net::TcpListener::bind(&config.run_address)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    token.cancel();
    if let Some(worker) = worker {
        match worker.wait(config.shutdown_timeout).await {
            Ok(()) => tracing::info!("reconciliation worker stopped"),
            Err(e) => tracing::warn!(error = %e, "reconciliation worker did not shut down cleanly"),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the store and serve
    match config.database_uri.as_deref() {
        Some(uri) => {
            let store = PostgresLedgerStore::connect(uri, MAX_DB_CONNECTIONS)
                .await
                .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");

            serve(store.clone(), &config, metrics_handle).await;
            store.pool().close().await;
        }
        None => {
            tracing::warn!("DATABASE_URI not set, using in-memory store");
            serve(InMemoryLedgerStore::new(), &config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
