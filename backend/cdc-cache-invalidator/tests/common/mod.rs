#![allow(dead_code)]

use async_trait::async_trait;
use cache_invalidation::{CacheStore, InvalidationError};
use cdc_cache_invalidator::broker::{
    Batch, BrokerClient, BrokerFactory, ConsumedRecord, FetchError, OffsetTracker, PollOutcome,
    RebalanceGate,
};
use cdc_cache_invalidator::ConsumerError;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "cdc.public.sinners";

pub fn record(partition: i32, offset: i64, payload: Option<Vec<u8>>) -> ConsumedRecord {
    ConsumedRecord {
        topic: TOPIC.to_string(),
        partition,
        offset,
        key: None,
        payload,
        timestamp_ms: Some(1_700_000_000_000),
    }
}

pub fn event(partition: i32, offset: i64, value: Value) -> ConsumedRecord {
    record(partition, offset, Some(serde_json::to_vec(&value).unwrap()))
}

/// Schema-wrapped update of the row identified by `code`
pub fn update(partition: i32, offset: i64, code: i64) -> ConsumedRecord {
    event(
        partition,
        offset,
        json!({
            "schema": {"type": "struct"},
            "payload": {
                "before": {"code": code, "name": "old"},
                "after": {"code": code, "name": "new"},
                "source": {"connector": "postgresql", "schema": "public", "table": "sinners"},
                "op": "u",
                "ts_ms": 1_700_000_000_000i64
            }
        }),
    )
}

/// One scripted poll result
pub enum Poll {
    Records(Vec<ConsumedRecord>),
    Empty,
    FetchErrors(Vec<FetchError>),
    Closed(ConsumerError),
}

#[derive(Default)]
pub struct BrokerState {
    pub script: VecDeque<Poll>,
    pub tracker: OffsetTracker,
    pub marked: Vec<(i32, i64)>,
    /// Snapshot of each successful commit: (topic, partition, highest marked offset)
    pub commits: Vec<Vec<(String, i32, i64)>>,
    /// Whether a batch held the rebalance gate at each commit
    pub held_during_commit: Vec<bool>,
    /// Whether the gate was still held when each poll started
    pub held_at_poll: Vec<bool>,
    pub fail_commits: bool,
    pub connect_failures: u32,
    pub connects: u32,
    pub left_group: u32,
    pub gate: RebalanceGate,
}

impl BrokerState {
    pub fn committed_offsets(&self) -> Vec<(i32, i64)> {
        self.commits
            .iter()
            .flatten()
            .map(|(_, partition, offset)| (*partition, *offset))
            .collect()
    }
}

/// Factory handing out clients that share one scripted state
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub state: Arc<Mutex<BrokerState>>,
}

impl FakeFactory {
    pub fn with_script(script: Vec<Poll>) -> Self {
        let factory = Self::default();
        factory.state.lock().unwrap().script = script.into();
        factory
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl BrokerFactory for FakeFactory {
    type Client = FakeBroker;

    async fn connect(&self, cancel: &CancellationToken) -> cdc_cache_invalidator::Result<FakeBroker> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if cancel.is_cancelled() {
            return Err(ConsumerError::Cancelled);
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(ConsumerError::ClientCreation("broker unreachable".to_string()));
        }
        Ok(FakeBroker {
            state: self.state.clone(),
        })
    }
}

pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn poll(&mut self, max_records: usize) -> PollOutcome {
        let mut state = self.state.lock().unwrap();
        let held = state.gate.is_held();
        state.held_at_poll.push(held);
        match state.script.pop_front() {
            Some(Poll::Records(mut records)) => {
                records.truncate(max_records);
                let hold = state.gate.hold();
                PollOutcome::Records(Batch::new(records, Some(hold)))
            }
            Some(Poll::Empty) => PollOutcome::Empty,
            Some(Poll::FetchErrors(errors)) => PollOutcome::FetchErrors(errors),
            Some(Poll::Closed(e)) => PollOutcome::Closed(e),
            // Script exhausted: behave as a client shut down underneath the loop
            None => PollOutcome::Closed(ConsumerError::Cancelled),
        }
    }

    fn mark(&mut self, record: &ConsumedRecord) -> bool {
        let mut state = self.state.lock().unwrap();
        let accepted = state.tracker.mark(record);
        if accepted {
            state.marked.push((record.partition, record.offset));
        }
        accepted
    }

    async fn commit_marked(&mut self, _timeout: Duration) -> cdc_cache_invalidator::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits {
            return Err(ConsumerError::Commit("coordinator not available".to_string()));
        }
        let snapshot = state.tracker.pending();
        if snapshot.is_empty() {
            return Ok(0);
        }
        let held = state.gate.is_held();
        state.held_during_commit.push(held);
        state.tracker.committed(&snapshot);
        let partitions = snapshot.len();
        state.commits.push(snapshot);
        Ok(partitions)
    }

    fn pending_marks(&self) -> usize {
        self.state.lock().unwrap().tracker.pending().len()
    }

    async fn leave_group(&mut self, _timeout: Duration) -> cdc_cache_invalidator::Result<()> {
        self.state.lock().unwrap().left_group += 1;
        Ok(())
    }
}

/// Cache that records deletions, fails on chosen keys and can trigger
/// shutdown right after deleting a chosen key.
#[derive(Clone, Default)]
pub struct FakeCache {
    pub deleted: Arc<Mutex<Vec<String>>>,
    pub fail_on: Arc<Mutex<HashSet<String>>>,
    pub cancel_after: Arc<Mutex<Option<(String, CancellationToken)>>>,
}

impl FakeCache {
    pub fn failing_on(key: &str) -> Self {
        let cache = Self::default();
        cache.fail_on.lock().unwrap().insert(key.to_string());
        cache
    }

    pub fn cancelling_after(key: &str, token: CancellationToken) -> Self {
        let cache = Self::default();
        *cache.cancel_after.lock().unwrap() = Some((key.to_string(), token));
        cache
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheStore for FakeCache {
    async fn delete(&self, key: &str) -> cache_invalidation::Result<u64> {
        if self.fail_on.lock().unwrap().contains(key) {
            return Err(InvalidationError::Timeout(format!("DEL {}", key)));
        }
        self.deleted.lock().unwrap().push(key.to_string());

        if let Some((trigger, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if trigger == key {
                token.cancel();
            }
        }
        Ok(1)
    }
}
