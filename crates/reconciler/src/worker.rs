//! The reconciliation worker loop.

use std::time::Duration;

use accrual::{AccrualError, AccrualProvider, AccrualStatus};
use common::OrderState;
use ledger_store::{OrderStore, PendingOrder, StoreError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ShutdownError;
use crate::schedule::PollSchedule;

/// Tuning knobs for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Delay between polls while there is work.
    pub base_interval: Duration,
    /// The interval never grows past `base_interval * max_interval_multiplier`.
    pub max_interval_multiplier: u32,
    /// Maximum number of orders fetched per poll.
    pub batch_size: usize,
    /// Upper bound for a single provider call.
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_interval_multiplier: 10,
            batch_size: 100,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// What a single pass over the pending batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Orders fetched from the store.
    pub fetched: usize,
    /// Orders whose state was written.
    pub updated: usize,
    /// Orders the provider does not know yet.
    pub unknown: usize,
    /// Orders skipped because of a provider or store error.
    pub failed: usize,
    /// Set when the provider asked us to pause; the rest of the batch was abandoned.
    pub rate_limited: Option<Duration>,
    /// The pending batch could not be fetched.
    pub store_failed: bool,
    /// Cancellation interrupted the pass.
    pub cancelled: bool,
}

impl PassReport {
    /// True if the poll found orders to work on.
    pub fn found_work(&self) -> bool {
        self.fetched > 0
    }
}

/// Polls pending orders and records the provider's verdict on each.
pub struct ReconciliationWorker<S: OrderStore, P: AccrualProvider> {
    store: S,
    provider: P,
    config: WorkerConfig,
}

impl<S: OrderStore, P: AccrualProvider> ReconciliationWorker<S, P> {
    /// Creates a worker over the given store and provider.
    pub fn new(store: S, provider: P, config: WorkerConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs the polling loop until `token` is cancelled.
    ///
    /// Errors never end the loop; affected orders are retried on a later pass.
    pub async fn run(&self, token: CancellationToken) {
        let mut schedule = PollSchedule::new(
            self.config.base_interval,
            self.config.max_interval_multiplier,
        );
        tracing::info!(
            base_interval = ?schedule.base(),
            ceiling = ?schedule.ceiling(),
            batch_size = self.config.batch_size,
            "reconciliation worker started"
        );

        loop {
            let delay = schedule.current();
            metrics::gauge!("accrual_poll_interval_seconds").set(delay.as_secs_f64());

            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let report = self.run_pass(&token).await;
            if report.cancelled {
                break;
            }

            if report.found_work() {
                schedule.on_work();
            } else {
                let next = schedule.on_empty();
                tracing::trace!(next_poll = ?next, "no pending orders, backing off");
            }

            if let Some(pause) = report.rate_limited {
                tracing::warn!(?pause, "accrual provider rate limited, pausing worker");
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!("reconciliation worker stopped");
    }

    /// Fetches one batch of pending orders and processes it, oldest first.
    ///
    /// Cancellation is checked before each order, and an in-flight provider
    /// call is abandoned when the token fires. A state write is never
    /// interrupted halfway.
    #[tracing::instrument(skip_all)]
    pub async fn run_pass(&self, token: &CancellationToken) -> PassReport {
        let mut report = PassReport::default();
        metrics::counter!("accrual_polls_total").increment(1);

        let batch = match self.store.fetch_pending_batch(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch pending orders");
                report.store_failed = true;
                return report;
            }
        };
        report.fetched = batch.len();

        for order in &batch {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let answer = tokio::select! {
                biased;
                () = token.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                answer = tokio::time::timeout(
                    self.config.request_timeout,
                    self.provider.query(&order.number),
                ) => answer.unwrap_or(Err(AccrualError::Timeout)),
            };

            match answer {
                Ok(Some(status)) => match self.apply(order, status).await {
                    Ok(true) => report.updated += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(number = %order.number, error = %e, "failed to record accrual status");
                        report.failed += 1;
                    }
                },
                Ok(None) => {
                    tracing::debug!(number = %order.number, "order not known to accrual provider yet");
                    report.unknown += 1;
                }
                Err(AccrualError::RateLimited { retry_after }) => {
                    metrics::counter!("accrual_rate_limited_total").increment(1);
                    report.rate_limited = Some(retry_after);
                    break;
                }
                Err(e) => {
                    tracing::warn!(number = %order.number, error = %e, "accrual provider query failed");
                    metrics::counter!("accrual_provider_errors_total").increment(1);
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            fetched = report.fetched,
            updated = report.updated,
            unknown = report.unknown,
            failed = report.failed,
            "reconciliation pass finished"
        );
        report
    }

    /// Writes the transition implied by the provider status.
    ///
    /// Returns `Ok(false)` when the order had already left the pending states.
    async fn apply(&self, order: &PendingOrder, status: AccrualStatus) -> Result<bool, StoreError> {
        let is_final = status.is_final();
        let (state, written) = match status {
            AccrualStatus::Registered | AccrualStatus::Processing => (
                OrderState::Processing,
                self.store.set_state(order.id, OrderState::Processing).await,
            ),
            AccrualStatus::Invalid => (
                OrderState::Invalid,
                self.store.set_state(order.id, OrderState::Invalid).await,
            ),
            AccrualStatus::Processed { accrual } => (
                OrderState::Accepted,
                self.store.set_state_accepted(order.id, accrual).await,
            ),
        };

        match written {
            Ok(()) => {
                if is_final {
                    tracing::info!(
                        number = %order.number,
                        user_id = %order.user_id,
                        state = state.as_str(),
                        "order reached final state"
                    );
                } else {
                    tracing::debug!(number = %order.number, state = state.as_str(), "order state recorded");
                }
                metrics::counter!("accrual_orders_updated_total", "state" => state.as_str())
                    .increment(1);
                Ok(true)
            }
            Err(StoreError::OrderNotPending(_)) => {
                tracing::debug!(number = %order.number, "order already final, skipping");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl<S, P> ReconciliationWorker<S, P>
where
    S: OrderStore + 'static,
    P: AccrualProvider + 'static,
{
    /// Spawns the loop on the runtime. Cancelling `token` stops it.
    pub fn spawn(self, token: CancellationToken) -> WorkerHandle {
        let task_token = token.clone();
        let join = tokio::spawn(async move { self.run(task_token).await });
        WorkerHandle { token, join }
    }
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Asks the worker to stop. Does not wait.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits up to `timeout` for the worker to exit.
    pub async fn wait(self, timeout: Duration) -> Result<(), ShutdownError> {
        match tokio::time::timeout(timeout, self.join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownError::Join(e.to_string())),
            Err(_) => Err(ShutdownError::Timeout(timeout)),
        }
    }
}
