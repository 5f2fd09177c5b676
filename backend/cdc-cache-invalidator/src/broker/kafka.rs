use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::ClientContext;
use resilience::{with_retry, with_timeout, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    Batch, BrokerClient, BrokerFactory, ConsumedRecord, FetchError, OffsetTracker, PollOutcome,
    RebalanceGate,
};
use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};

/// Consumer context that ties librdkafka rebalances to the batch in flight.
///
/// Callbacks fire inside `recv()` on the polling task. Before partitions are
/// revoked it waits for the current batch to release its hold, then drops the
/// revoked cursors so their marks are never committed on behalf of the new
/// owner.
pub struct GateContext {
    gate: RebalanceGate,
    offsets: Arc<Mutex<OffsetTracker>>,
    max_wait: Duration,
}

impl ClientContext for GateContext {}

impl ConsumerContext for GateContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                self.gate.wait_released(self.max_wait);
                self.forget_revoked(tpl);
            }
            Rebalance::Assign(tpl) => {
                info!(partitions = %describe(tpl), "Partitions being assigned");
            }
            Rebalance::Error(e) => {
                warn!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            info!(partitions = %describe(tpl), "Partitions revoked");
        }
    }
}

impl GateContext {
    fn forget_revoked(&self, revoked: &TopicPartitionList) {
        let mut offsets = self.offsets.lock();
        for elem in revoked.elements() {
            // Every batch commits before the next poll, so uncommitted marks here
            // only follow a failed commit. The new owner redelivers them.
            if let Some(cursor) = offsets.revoke(elem.topic(), elem.partition()) {
                if !cursor.committed {
                    warn!(
                        topic = elem.topic(),
                        partition = elem.partition(),
                        offset = cursor.offset,
                        "Revoked partition had uncommitted marks"
                    );
                }
            }
        }
    }
}

fn describe(tpl: &TopicPartitionList) -> String {
    tpl.elements()
        .iter()
        .map(|elem| format!("{}[{}]", elem.topic(), elem.partition()))
        .collect::<Vec<_>>()
        .join(",")
}

fn to_record<M: Message>(message: &M) -> ConsumedRecord {
    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        timestamp_ms: message.timestamp().to_millis(),
    }
}

/// Builds Kafka consumer-group members from [`ConsumerConfig`]
#[derive(Debug, Clone)]
pub struct KafkaBrokerFactory {
    config: ConsumerConfig,
}

impl KafkaBrokerFactory {
    pub fn new(config: ConsumerConfig) -> Self {
        Self { config }
    }

    /// librdkafka settings for one member
    pub fn client_config(&self) -> ClientConfig {
        let c = &self.config;
        let policy = c.backoff_policy();
        // librdkafka has no separate rebalance timeout; it follows max.poll.interval.ms
        let max_poll_interval = c.kafka_rebalance_timeout_ms.max(c.kafka_session_timeout_ms);

        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", c.brokers())
            .set("group.id", &c.kafka_consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("partition.assignment.strategy", "cooperative-sticky")
            .set("session.timeout.ms", c.kafka_session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", c.kafka_heartbeat_interval_ms.to_string())
            .set("socket.timeout.ms", c.kafka_request_timeout_ms.to_string())
            .set("max.poll.interval.ms", max_poll_interval.to_string())
            .set("fetch.min.bytes", c.kafka_fetch_min_bytes.to_string())
            .set("fetch.max.bytes", c.kafka_fetch_max_bytes.to_string())
            .set("fetch.wait.max.ms", c.kafka_fetch_max_wait_ms.to_string())
            .set("reconnect.backoff.ms", policy.base.as_millis().to_string())
            .set("reconnect.backoff.max.ms", policy.max.as_millis().to_string())
            .set("retry.backoff.ms", policy.base.as_millis().to_string())
            .set("retry.backoff.max.ms", policy.max.as_millis().to_string());
        client
    }

    async fn verify_reachable(
        &self,
        consumer: &Arc<StreamConsumer<GateContext>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let retry = RetryConfig {
            policy: self.config.backoff_policy(),
            max_elapsed: self.config.connect_timeout(),
        };
        let probe_timeout = Duration::from_millis(self.config.kafka_request_timeout_ms)
            .min(self.config.connect_timeout());

        let probe = with_retry(&retry, || {
            let consumer = consumer.clone();
            let topic = self.config.kafka_cdc_topic.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    consumer
                        .fetch_metadata(Some(&topic), probe_timeout)
                        .map(|metadata| {
                            metadata
                                .topics()
                                .iter()
                                .map(|t| t.partitions().len())
                                .sum::<usize>()
                        })
                })
                .await
                .map_err(|e| ConsumerError::Broker(format!("metadata task failed: {}", e)))?
                .map_err(ConsumerError::from)
            }
        });

        let partitions = tokio::select! {
            _ = cancel.cancelled() => return Err(ConsumerError::Cancelled),
            result = probe => result.map_err(|e| ConsumerError::Broker(e.to_string()))?,
        };

        if partitions == 0 {
            warn!(
                topic = %self.config.kafka_cdc_topic,
                "Topic has no partitions yet, waiting for it to be created"
            );
        } else {
            debug!(topic = %self.config.kafka_cdc_topic, partitions, "Broker reachable");
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerFactory for KafkaBrokerFactory {
    type Client = KafkaBrokerClient;

    async fn connect(&self, cancel: &CancellationToken) -> Result<KafkaBrokerClient> {
        let gate = RebalanceGate::new();
        let offsets = Arc::new(Mutex::new(OffsetTracker::new()));
        let context = GateContext {
            gate: gate.clone(),
            offsets: offsets.clone(),
            max_wait: Duration::from_millis(self.config.kafka_rebalance_timeout_ms),
        };

        let consumer: StreamConsumer<GateContext> = self
            .client_config()
            .create_with_context(context)
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                ConsumerError::ClientCreation(e.to_string())
            })?;
        let consumer = Arc::new(consumer);

        consumer
            .subscribe(&[self.config.kafka_cdc_topic.as_str()])
            .map_err(|e| {
                error!("Failed to subscribe to topic: {}", e);
                ConsumerError::ClientCreation(e.to_string())
            })?;

        self.verify_reachable(&consumer, cancel).await?;

        info!(
            brokers = %self.config.brokers(),
            group = %self.config.kafka_consumer_group,
            topic = %self.config.kafka_cdc_topic,
            "Kafka consumer connected"
        );

        Ok(KafkaBrokerClient {
            consumer,
            offsets,
            gate,
            cancel: cancel.clone(),
            poll_timeout: self.config.poll_timeout(),
        })
    }
}

pub struct KafkaBrokerClient {
    consumer: Arc<StreamConsumer<GateContext>>,
    offsets: Arc<Mutex<OffsetTracker>>,
    gate: RebalanceGate,
    cancel: CancellationToken,
    poll_timeout: Duration,
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn poll(&mut self, max_records: usize) -> PollOutcome {
        let first = tokio::select! {
            _ = self.cancel.cancelled() => return PollOutcome::Closed(ConsumerError::Cancelled),
            received = tokio::time::timeout(self.poll_timeout, self.consumer.recv()) => {
                received.map(|result| result.map(|message| to_record(&message)))
            }
        };

        let first = match first {
            Err(_) => return PollOutcome::Empty,
            Ok(Err(e)) => return PollOutcome::FetchErrors(vec![FetchError::broker(e.to_string())]),
            Ok(Ok(record)) => record,
        };

        let mut records = vec![first];
        let mut errors = Vec::new();
        while records.len() < max_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => records.push(to_record(&message)),
                Some(Err(e)) => {
                    errors.push(FetchError::broker(e.to_string()));
                    break;
                }
                None => break,
            }
        }

        // Buffered records are still handed out; a persistent error repeats on the next poll.
        for e in &errors {
            warn!("Fetch error after {} buffered record(s): {}", records.len(), e);
        }

        debug!(records = records.len(), "Polled batch");
        PollOutcome::Records(Batch::new(records, Some(self.gate.hold())))
    }

    fn mark(&mut self, record: &ConsumedRecord) -> bool {
        self.offsets.lock().mark(record)
    }

    async fn commit_marked(&mut self, timeout: Duration) -> Result<usize> {
        let snapshot = self.offsets.lock().pending();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut tpl = TopicPartitionList::new();
        for (topic, partition, offset) in &snapshot {
            tpl.add_partition_offset(topic, *partition, Offset::Offset(offset + 1))?;
        }

        let consumer = self.consumer.clone();
        let committed = with_timeout(
            timeout,
            tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync)),
        )
        .await;

        match committed {
            Ok(Ok(Ok(()))) => {
                self.offsets.lock().committed(&snapshot);
                debug!(partitions = snapshot.len(), "Committed marked offsets");
                Ok(snapshot.len())
            }
            Ok(Ok(Err(e))) => Err(ConsumerError::Commit(e.to_string())),
            Ok(Err(e)) => Err(ConsumerError::Commit(format!("commit task failed: {}", e))),
            Err(e) => Err(ConsumerError::Commit(e.to_string())),
        }
    }

    fn pending_marks(&self) -> usize {
        self.offsets.lock().pending().len()
    }

    async fn leave_group(&mut self, timeout: Duration) -> Result<()> {
        let consumer = self.consumer.clone();
        match with_timeout(timeout, tokio::task::spawn_blocking(move || consumer.unsubscribe()))
            .await
        {
            Ok(Ok(())) => {
                info!("Left consumer group");
                Ok(())
            }
            Ok(Err(e)) => Err(ConsumerError::Broker(format!("leave group task failed: {}", e))),
            Err(e) => Err(ConsumerError::Broker(format!("leave group: {}", e))),
        }
    }
}
