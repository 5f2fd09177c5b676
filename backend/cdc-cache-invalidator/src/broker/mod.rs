//! Broker client adapter
//!
//! The consumer loop talks to the broker only through [`BrokerClient`] and
//! [`BrokerFactory`]; `kafka` holds the rdkafka implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ConsumerError, Result};

mod gate;
pub mod kafka;
mod offsets;

pub use gate::{RebalanceGate, RebalanceHold};
pub use kafka::{KafkaBrokerClient, KafkaBrokerFactory};
pub use offsets::{OffsetTracker, PartitionCursor};

/// Owned copy of one fetched record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub timestamp_ms: Option<i64>,
}

/// Records returned by one poll, in arrival order.
///
/// The batch keeps rebalances blocked until it is dropped.
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<ConsumedRecord>,
    hold: Option<RebalanceHold>,
}

impl Batch {
    pub fn new(records: Vec<ConsumedRecord>, hold: Option<RebalanceHold>) -> Self {
        Self { records, hold }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn holds_rebalance(&self) -> bool {
        self.hold.is_some()
    }

    /// Records grouped per (topic, partition), arrival order kept within each group.
    pub fn by_partition(&self) -> BTreeMap<(String, i32), Vec<&ConsumedRecord>> {
        let mut partitions: BTreeMap<(String, i32), Vec<&ConsumedRecord>> = BTreeMap::new();
        for record in &self.records {
            partitions
                .entry((record.topic.clone(), record.partition))
                .or_default()
                .push(record);
        }
        partitions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The client observed shutdown while fetching
    Cancelled,
    Broker(String),
}

/// Error reported for one fetch, optionally scoped to a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub topic: Option<String>,
    pub partition: Option<i32>,
    pub failure: FetchFailure,
}

impl FetchError {
    pub fn broker(message: impl Into<String>) -> Self {
        Self {
            topic: None,
            partition: None,
            failure: FetchFailure::Broker(message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            topic: None,
            partition: None,
            failure: FetchFailure::Cancelled,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.failure == FetchFailure::Cancelled
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.topic, self.partition) {
            (Some(topic), Some(partition)) => write!(f, "{}[{}]: ", topic, partition)?,
            (Some(topic), None) => write!(f, "{}: ", topic)?,
            _ => {}
        }
        match &self.failure {
            FetchFailure::Cancelled => write!(f, "fetch cancelled"),
            FetchFailure::Broker(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Records(Batch),
    /// Nothing arrived within the poll timeout
    Empty,
    FetchErrors(Vec<FetchError>),
    /// The client can no longer be polled
    Closed(ConsumerError),
}

/// Consumer-group member subscribed to the change topic
#[async_trait]
pub trait BrokerClient: Send {
    async fn poll(&mut self, max_records: usize) -> PollOutcome;

    /// Mark a fully handled record for the next commit.
    fn mark(&mut self, record: &ConsumedRecord) -> bool;

    /// Commit every mark not yet committed. Returns the number of partitions committed.
    async fn commit_marked(&mut self, timeout: Duration) -> Result<usize>;

    /// Partitions with marks not yet committed
    fn pending_marks(&self) -> usize;

    async fn leave_group(&mut self, timeout: Duration) -> Result<()>;
}

#[async_trait]
pub trait BrokerFactory: Send + Sync {
    type Client: BrokerClient;

    /// Build, subscribe and verify a new client.
    async fn connect(&self, cancel: &CancellationToken) -> Result<Self::Client>;
}
