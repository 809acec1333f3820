//! Scriptable in-memory accrual provider for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AccrualError, Result};
use crate::provider::{AccrualProvider, AccrualStatus};

/// A single scripted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Answer with a status.
    Status(AccrualStatus),
    /// Answer "unknown order".
    Unknown,
    /// Answer with a rate-limit pause.
    RateLimited(Duration),
    /// Fail the call.
    Fail(String),
}

#[derive(Debug, Default)]
struct ProviderState {
    statuses: HashMap<String, AccrualStatus>,
    queued: HashMap<String, VecDeque<ScriptedReply>>,
    queries: HashMap<String, usize>,
    delay: Option<Duration>,
}

/// In-memory accrual provider.
///
/// Queued one-shot replies for a number are consumed first, then the
/// persistent status set with [`set_status`](Self::set_status). Numbers
/// with neither are unknown.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccrualProvider {
    state: Arc<RwLock<ProviderState>>,
}

impl InMemoryAccrualProvider {
    /// Creates a provider that knows no orders.
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProviderState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the status returned for `number` on every query.
    pub fn set_status(&self, number: &str, status: AccrualStatus) {
        self.write().statuses.insert(number.to_string(), status);
    }

    /// Queues a reply returned once for `number`, before its status.
    pub fn push_reply(&self, number: &str, reply: ScriptedReply) {
        self.write()
            .queued
            .entry(number.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Delays every answer, simulating a slow provider.
    pub fn set_delay(&self, delay: Duration) {
        self.write().delay = Some(delay);
    }

    /// Number of queries received for `number`.
    pub fn query_count(&self, number: &str) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .queries
            .get(number)
            .copied()
            .unwrap_or(0)
    }

    /// Number of queries received overall.
    pub fn total_queries(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .queries
            .values()
            .sum()
    }

    fn next_reply(&self, number: &str) -> (ScriptedReply, Option<Duration>) {
        let mut state = self.write();
        *state.queries.entry(number.to_string()).or_insert(0) += 1;

        let queued = state.queued.get_mut(number).and_then(VecDeque::pop_front);
        let reply = queued.unwrap_or_else(|| match state.statuses.get(number) {
            Some(status) => ScriptedReply::Status(*status),
            None => ScriptedReply::Unknown,
        });
        (reply, state.delay)
    }
}

#[async_trait]
impl AccrualProvider for InMemoryAccrualProvider {
    async fn query(&self, number: &str) -> Result<Option<AccrualStatus>> {
        let (reply, delay) = self.next_reply(number);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            ScriptedReply::Status(status) => Ok(Some(status)),
            ScriptedReply::Unknown => Ok(None),
            ScriptedReply::RateLimited(retry_after) => Err(AccrualError::RateLimited { retry_after }),
            ScriptedReply::Fail(message) => Err(AccrualError::Provider(message)),
        }
    }
}
