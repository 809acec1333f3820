//! Integration tests for the reconciliation worker.
//!
//! Timing-sensitive tests run on a paused clock: the runtime jumps straight
//! to the next timer whenever every task is idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use accrual::{AccrualProvider, AccrualStatus, InMemoryAccrualProvider, ScriptedReply};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderState, UserId};
use domain::{BalanceService, LedgerError, OrderService};
use ledger_store::{InMemoryLedgerStore, OrderRecord, OrderStore, PendingOrder};
use reconciler::{ReconciliationWorker, ShutdownError, WorkerConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const A: &str = "79927398713";
const B: &str = "12345678903";
const C: &str = "4561261212345467";

fn config() -> WorkerConfig {
    WorkerConfig {
        base_interval: Duration::from_secs(1),
        max_interval_multiplier: 10,
        batch_size: 100,
        request_timeout: Duration::from_secs(5),
    }
}

async fn add_order(store: &InMemoryLedgerStore, number: &str) -> OrderId {
    store
        .create_order(UserId::new(), number, OrderState::New, Utc::now())
        .await
        .unwrap()
}

async fn state_of(store: &InMemoryLedgerStore, number: &str) -> OrderState {
    store.find_order(number).await.unwrap().state
}

fn processed(cents: i64) -> AccrualStatus {
    AccrualStatus::Processed {
        accrual: Money::from_cents(cents),
    }
}

/// Store wrapper recording when each poll hit the store.
#[derive(Clone)]
struct RecordingStore {
    inner: InMemoryLedgerStore,
    polls: Arc<Mutex<Vec<Instant>>>,
}

impl RecordingStore {
    fn new(inner: InMemoryLedgerStore) -> Self {
        Self {
            inner,
            polls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn poll_times(&self) -> Vec<Instant> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderStore for RecordingStore {
    async fn create_order(
        &self,
        user_id: UserId,
        number: &str,
        state: OrderState,
        uploaded_at: DateTime<Utc>,
    ) -> ledger_store::Result<OrderId> {
        self.inner
            .create_order(user_id, number, state, uploaded_at)
            .await
    }

    async fn find_owner_by_number(&self, number: &str) -> ledger_store::Result<Option<UserId>> {
        self.inner.find_owner_by_number(number).await
    }

    async fn list_orders_by_user(&self, user_id: UserId) -> ledger_store::Result<Vec<OrderRecord>> {
        self.inner.list_orders_by_user(user_id).await
    }

    async fn fetch_pending_batch(&self, limit: usize) -> ledger_store::Result<Vec<PendingOrder>> {
        self.polls.lock().unwrap().push(Instant::now());
        self.inner.fetch_pending_batch(limit).await
    }

    async fn set_state(&self, order_id: OrderId, state: OrderState) -> ledger_store::Result<()> {
        self.inner.set_state(order_id, state).await
    }

    async fn set_state_accepted(&self, order_id: OrderId, accrual: Money) -> ledger_store::Result<()> {
        self.inner.set_state_accepted(order_id, accrual).await
    }
}

fn gaps(times: &[Instant]) -> Vec<Duration> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

fn close_to(actual: Duration, expected: Duration) -> bool {
    actual.abs_diff(expected) <= Duration::from_millis(5)
}

mod passes {
    use super::*;

    #[tokio::test]
    async fn test_status_mapping_is_applied() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        for number in [A, B, C, "18"] {
            add_order(&store, number).await;
        }
        provider.set_status(A, processed(50_000));
        provider.set_status(B, AccrualStatus::Invalid);
        provider.set_status(C, AccrualStatus::Registered);

        let worker = ReconciliationWorker::new(store.clone(), provider, config());
        let report = worker.run_pass(&CancellationToken::new()).await;

        assert_eq!(report.fetched, 4);
        assert_eq!(report.updated, 3);
        assert_eq!(report.unknown, 1);

        let accepted = store.find_order(A).await.unwrap();
        assert_eq!(accepted.state, OrderState::Accepted);
        assert_eq!(accepted.accrual, Some(Money::from_cents(50_000)));
        assert_eq!(state_of(&store, B).await, OrderState::Invalid);
        assert_eq!(state_of(&store, C).await, OrderState::Processing);
        assert_eq!(state_of(&store, "18").await, OrderState::New);
    }

    #[tokio::test]
    async fn test_processed_with_zero_accrual_is_accepted() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        provider.set_status(A, processed(0));

        let worker = ReconciliationWorker::new(store.clone(), provider, config());
        worker.run_pass(&CancellationToken::new()).await;

        let order = store.find_order(A).await.unwrap();
        assert_eq!(order.state, OrderState::Accepted);
        assert_eq!(order.accrual, Some(Money::zero()));
    }

    #[tokio::test]
    async fn test_terminal_orders_are_not_queried_again() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        add_order(&store, B).await;
        provider.set_status(A, processed(100));
        provider.set_status(B, AccrualStatus::Invalid);

        let worker = ReconciliationWorker::new(store.clone(), provider.clone(), config());
        let token = CancellationToken::new();
        for _ in 0..5 {
            worker.run_pass(&token).await;
        }

        assert_eq!(provider.query_count(A), 1);
        assert_eq!(provider.query_count(B), 1);
    }

    #[tokio::test]
    async fn test_processing_orders_stay_pending_until_final() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        provider.push_reply(A, ScriptedReply::Status(AccrualStatus::Registered));
        provider.push_reply(A, ScriptedReply::Status(AccrualStatus::Processing));
        provider.set_status(A, processed(1_234));

        let worker = ReconciliationWorker::new(store.clone(), provider.clone(), config());
        let token = CancellationToken::new();

        worker.run_pass(&token).await;
        assert_eq!(state_of(&store, A).await, OrderState::Processing);
        worker.run_pass(&token).await;
        assert_eq!(state_of(&store, A).await, OrderState::Processing);
        worker.run_pass(&token).await;
        assert_eq!(state_of(&store, A).await, OrderState::Accepted);

        let report = worker.run_pass(&token).await;
        assert_eq!(report.fetched, 0);
        assert_eq!(provider.query_count(A), 3);
    }

    #[tokio::test]
    async fn test_provider_errors_skip_only_that_order() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        add_order(&store, B).await;
        provider.push_reply(A, ScriptedReply::Fail("connection reset".into()));
        provider.set_status(A, processed(100));
        provider.set_status(B, processed(200));

        let worker = ReconciliationWorker::new(store.clone(), provider, config());
        let report = worker.run_pass(&CancellationToken::new()).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(state_of(&store, A).await, OrderState::New);
        assert_eq!(state_of(&store, B).await, OrderState::Accepted);

        worker.run_pass(&CancellationToken::new()).await;
        assert_eq!(state_of(&store, A).await, OrderState::Accepted);
    }

    #[tokio::test]
    async fn test_rate_limit_abandons_rest_of_batch() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        add_order(&store, B).await;
        provider.push_reply(A, ScriptedReply::RateLimited(Duration::from_secs(30)));
        provider.set_status(A, processed(100));
        provider.set_status(B, processed(200));

        let worker = ReconciliationWorker::new(store.clone(), provider.clone(), config());
        let report = worker.run_pass(&CancellationToken::new()).await;

        assert_eq!(report.rate_limited, Some(Duration::from_secs(30)));
        assert_eq!(report.updated, 0);
        assert_eq!(state_of(&store, A).await, OrderState::New);
        assert_eq!(state_of(&store, B).await, OrderState::New);
        assert_eq!(provider.query_count(B), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_call_is_bounded_by_timeout() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        provider.set_status(A, processed(100));
        provider.set_delay(Duration::from_secs(60));

        let worker = ReconciliationWorker::new(store.clone(), provider, config());
        let started = Instant::now();
        let report = worker.run_pass(&CancellationToken::new()).await;

        assert_eq!(report.failed, 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(state_of(&store, A).await, OrderState::New);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_reported_not_fatal() {
        let store = InMemoryLedgerStore::new();
        add_order(&store, A).await;
        store.set_unavailable(true);

        let worker =
            ReconciliationWorker::new(store.clone(), InMemoryAccrualProvider::new(), config());
        let report = worker.run_pass(&CancellationToken::new()).await;
        assert!(report.store_failed);
        assert!(!report.found_work());
    }
}

mod polling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_polling_backs_off_to_ceiling() {
        let store = RecordingStore::new(InMemoryLedgerStore::new());
        let worker =
            ReconciliationWorker::new(store.clone(), InMemoryAccrualProvider::new(), config());
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        tokio::time::sleep(Duration::from_secs(120)).await;
        handle.shutdown();
        handle.wait(Duration::from_secs(1)).await.unwrap();

        let gaps = gaps(&store.poll_times());
        assert!(gaps.len() >= 5, "expected several polls, got {gaps:?}");
        assert!(close_to(gaps[0], Duration::from_secs(2)));
        for pair in gaps.windows(2) {
            assert!(pair[1] + Duration::from_millis(5) >= pair[0], "{gaps:?}");
        }
        for gap in &gaps {
            assert!(*gap <= Duration::from_secs(10) + Duration::from_millis(5), "{gaps:?}");
        }
        assert!(close_to(*gaps.last().unwrap(), Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_after_backoff_resets_interval() {
        let inner = InMemoryLedgerStore::new();
        let store = RecordingStore::new(inner.clone());
        let provider = InMemoryAccrualProvider::new();
        provider.set_status(A, processed(100));

        let worker = ReconciliationWorker::new(store.clone(), provider, config());
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let registered_at = Instant::now();
        add_order(&inner, A).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.shutdown();
        handle.wait(Duration::from_secs(1)).await.unwrap();

        assert_eq!(state_of(&inner, A).await, OrderState::Accepted);

        let times = store.poll_times();
        let work_poll = times
            .iter()
            .position(|t| *t > registered_at)
            .expect("a poll after registration");
        // Picked up within one ceiling interval.
        assert!(times[work_poll] - registered_at <= Duration::from_secs(10));
        // The following poll comes after the base interval again.
        assert!(close_to(
            times[work_poll + 1] - times[work_poll],
            Duration::from_secs(1)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delays_next_poll_of_whole_batch() {
        let inner = InMemoryLedgerStore::new();
        let store = RecordingStore::new(inner.clone());
        let provider = InMemoryAccrualProvider::new();
        add_order(&inner, A).await;
        add_order(&inner, B).await;
        provider.push_reply(A, ScriptedReply::RateLimited(Duration::from_secs(30)));
        provider.set_status(A, processed(100));
        provider.set_status(B, processed(200));

        let worker = ReconciliationWorker::new(store.clone(), provider.clone(), config());
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        // First poll at t=1s hits the rate limit on A.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(provider.query_count(A), 1);
        assert_eq!(state_of(&inner, A).await, OrderState::New);

        // Nothing is polled while paused.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(store.poll_times().len(), 1);
        assert_eq!(provider.total_queries(), 1);
        assert_eq!(state_of(&inner, A).await, OrderState::New);
        assert_eq!(state_of(&inner, B).await, OrderState::New);

        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.shutdown();
        handle.wait(Duration::from_secs(1)).await.unwrap();

        let times = store.poll_times();
        assert!(times[1] - times[0] >= Duration::from_secs(30));
        assert_eq!(state_of(&inner, A).await, OrderState::Accepted);
        assert_eq!(state_of(&inner, B).await, OrderState::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_store_outage() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        provider.set_status(A, processed(100));
        store.set_unavailable(true);

        let worker = ReconciliationWorker::new(store.clone(), provider, config());
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!handle.is_finished());

        store.set_unavailable(false);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(state_of(&store, A).await, OrderState::Accepted);

        handle.shutdown();
        handle.wait(Duration::from_secs(1)).await.unwrap();
    }
}

mod shutdown {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_stops_promptly() {
        let worker = ReconciliationWorker::new(
            InMemoryLedgerStore::new(),
            InMemoryAccrualProvider::new(),
            config(),
        );
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();

        let started = Instant::now();
        handle.wait(Duration::from_secs(1)).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_batch_without_partial_writes() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        for number in [A, B, C] {
            add_order(&store, number).await;
            provider.set_status(number, processed(100));
        }
        provider.set_delay(Duration::from_secs(4));

        let worker = ReconciliationWorker::new(store.clone(), provider.clone(), config());
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        // Poll starts at t=1s; A's answer would arrive at t=5s.
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
        handle.wait(Duration::from_secs(1)).await.unwrap();

        for number in [A, B, C] {
            assert_eq!(state_of(&store, number).await, OrderState::New);
        }
        assert_eq!(provider.query_count(A), 1);
        assert_eq!(provider.query_count(B), 0);
        assert_eq!(provider.query_count(C), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_rate_limit_pause() {
        let store = InMemoryLedgerStore::new();
        let provider = InMemoryAccrualProvider::new();
        add_order(&store, A).await;
        provider.push_reply(A, ScriptedReply::RateLimited(Duration::from_secs(3_600)));

        let worker = ReconciliationWorker::new(store.clone(), provider, config());
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();
        handle.wait(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_while_worker_keeps_running() {
        let worker = ReconciliationWorker::new(
            InMemoryLedgerStore::new(),
            InMemoryAccrualProvider::new(),
            config(),
        );
        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        let err = handle.wait(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ShutdownError::Timeout(d) if d == Duration::from_secs(2)));
        token.cancel();
    }
}

#[tokio::test(start_paused = true)]
async fn test_accrued_points_flow_into_balance_and_withdrawals() {
    let store = InMemoryLedgerStore::new();
    let provider = InMemoryAccrualProvider::new();
    let orders = OrderService::new(store.clone());
    let balance = BalanceService::new(store.clone());
    let user = UserId::new();

    orders.register_order(user, A).await.unwrap();
    provider.set_status(
        A,
        AccrualStatus::Processed {
            accrual: Money::from_decimal(500.0).unwrap(),
        },
    );

    let token = CancellationToken::new();
    let handle = ReconciliationWorker::new(store.clone(), provider.clone(), config())
        .spawn(token.clone());

    tokio::time::sleep(Duration::from_secs(3)).await;
    let order = store.find_order(A).await.unwrap();
    assert_eq!(order.state, OrderState::Accepted);
    assert_eq!(order.accrual, Some(Money::from_cents(50_000)));

    let before = balance.get_balance(user).await.unwrap();
    assert_eq!(before.current, Money::from_cents(50_000));
    assert!(before.withdrawn.is_zero());

    balance
        .withdraw(user, A, Money::from_decimal(500.0).unwrap())
        .await
        .unwrap();

    let after = balance.get_balance(user).await.unwrap();
    assert!(after.current.is_zero());
    assert_eq!(after.withdrawn, Money::from_cents(50_000));

    let err = balance
        .withdraw(user, B, Money::from_decimal(0.01).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    handle.shutdown();
    handle.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(provider.query_count(A), 1);
}

/// Any provider can drive the worker, including shared ones.
#[tokio::test]
async fn test_shared_provider_handles_work() {
    let store = InMemoryLedgerStore::new();
    let provider = Arc::new(InMemoryAccrualProvider::new());
    add_order(&store, A).await;
    provider.set_status(A, processed(100));

    let shared: Arc<dyn AccrualProvider> = provider.clone();
    let worker = ReconciliationWorker::new(store.clone(), shared, config());
    worker.run_pass(&CancellationToken::new()).await;

    assert_eq!(state_of(&store, A).await, OrderState::Accepted);
}
