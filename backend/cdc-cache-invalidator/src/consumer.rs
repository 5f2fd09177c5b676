//! Invalidation engine and the supervised consumer episode
//!
//! One episode connects a broker client, then loops: poll a batch, invalidate
//! the pre-image key of every changed row, mark each handled record, commit
//! the marks. Records of one partition are handled strictly in order.

use async_trait::async_trait;
use cache_invalidation::{build_cache_key, CacheStore, StatsCollector};
use resilience::Episode;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Batch, BrokerClient, BrokerFactory, ConsumedRecord, FetchError, PollOutcome};
use crate::cdc::{decode, CdcOperation, Decoded, RowSnapshot};
use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};

/// How a cache key is derived from a row image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStrategy {
    /// Identifying column
    pub field: String,
    pub prefix: Option<String>,
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self {
            field: "code".to_string(),
            prefix: None,
        }
    }
}

impl KeyStrategy {
    pub fn key_for(&self, row: &RowSnapshot) -> Option<String> {
        row.identity(&self.field)
            .map(|identity| build_cache_key(self.prefix.as_deref(), &identity))
    }
}

/// What happened to one record. Every variant is safe to mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDisposition {
    /// Null or empty value
    Tombstone,
    /// Undecodable payload, or a pre-image without the identifying column
    Malformed,
    /// No pre-image: the row cannot be cached yet
    NothingCached,
    Invalidated { key: String, removed: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub marked: usize,
    pub invalidated: usize,
    pub skipped: usize,
}

pub struct InvalidationEngine<C> {
    cache: C,
    keys: KeyStrategy,
    stats: StatsCollector,
}

impl<C: CacheStore> InvalidationEngine<C> {
    pub fn new(cache: C, keys: KeyStrategy) -> Self {
        Self {
            cache,
            keys,
            stats: StatsCollector::new(),
        }
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// Apply the side effect of one record.
    ///
    /// Only a failed deletion is an error; the record must then stay unmarked.
    pub async fn handle_record(&self, record: &ConsumedRecord) -> Result<RecordDisposition> {
        debug!(
            partition = record.partition,
            offset = record.offset,
            "Message received"
        );

        let envelope = match decode(record.payload.as_deref()) {
            Ok(Decoded::Tombstone) => {
                debug!(partition = record.partition, offset = record.offset, "Empty value, skipping");
                self.stats.record_skip();
                return Ok(RecordDisposition::Tombstone);
            }
            Ok(Decoded::Event(envelope)) => envelope,
            Err(e) => {
                error!(
                    partition = record.partition,
                    offset = record.offset,
                    "Failed to decode change event: {}",
                    e
                );
                self.stats.record_skip();
                return Ok(RecordDisposition::Malformed);
            }
        };

        let before = match &envelope.before {
            Some(before) => before,
            None => {
                match envelope.op {
                    CdcOperation::Create | CdcOperation::Read => {
                        let identity = envelope
                            .after
                            .as_ref()
                            .and_then(|after| after.identity(&self.keys.field));
                        info!(
                            op = envelope.op.code(),
                            identity = identity.as_deref().unwrap_or("<none>"),
                            "First entry, nothing to invalidate"
                        );
                    }
                    op => {
                        debug!(op = op.code(), table = ?envelope.table(), "No pre-image, nothing to invalidate");
                    }
                }
                self.stats.record_skip();
                return Ok(RecordDisposition::NothingCached);
            }
        };

        let key = match self.keys.key_for(before) {
            Some(key) => key,
            None => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    field = %self.keys.field,
                    "Pre-image has no usable identifying field, skipping"
                );
                self.stats.record_skip();
                return Ok(RecordDisposition::Malformed);
            }
        };

        let started = Instant::now();
        match self.cache.delete(&key).await {
            Ok(removed) => {
                self.stats
                    .record_invalidation(started.elapsed().as_secs_f64() * 1000.0);
                info!(
                    key = %key,
                    removed,
                    op = envelope.op.code(),
                    source_ts = ?envelope.source_timestamp(),
                    "Cache cleared"
                );
                Ok(RecordDisposition::Invalidated { key, removed })
            }
            Err(source) => {
                self.stats.record_error();
                error!(
                    key = %key,
                    partition = record.partition,
                    offset = record.offset,
                    "Failed to clear cache: {}",
                    source
                );
                Err(ConsumerError::Invalidation { key, source })
            }
        }
    }

    /// Handle a batch partition by partition, marking each record once its
    /// side effect is done. Stops at the first failed deletion or when
    /// `cancel` fires; marks made so far are kept.
    pub async fn process_batch<B>(
        &self,
        client: &mut B,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Result<BatchReport>
    where
        B: BrokerClient + ?Sized,
    {
        let mut report = BatchReport::default();

        for ((topic, partition), records) in batch.by_partition() {
            for record in records {
                if cancel.is_cancelled() {
                    debug!(
                        topic = %topic,
                        partition,
                        offset = record.offset,
                        marked = report.marked,
                        "Cancelled mid-batch"
                    );
                    return Err(ConsumerError::Cancelled);
                }

                match self.handle_record(record).await? {
                    RecordDisposition::Invalidated { .. } => report.invalidated += 1,
                    _ => report.skipped += 1,
                }

                if client.mark(record) {
                    report.marked += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Timeouts and limits of one consumer episode
#[derive(Debug, Clone)]
pub struct EpisodeSettings {
    pub max_records: usize,
    pub commit_timeout: Duration,
    pub shutdown_commit_timeout: Duration,
    pub leave_group_timeout: Duration,
}

impl Default for EpisodeSettings {
    fn default() -> Self {
        Self {
            max_records: 100,
            commit_timeout: Duration::from_secs(5),
            shutdown_commit_timeout: Duration::from_secs(5),
            leave_group_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&ConsumerConfig> for EpisodeSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            max_records: config.kafka_poll_max_records,
            commit_timeout: config.commit_timeout(),
            shutdown_commit_timeout: config.shutdown_commit_timeout(),
            leave_group_timeout: config.leave_group_timeout(),
        }
    }
}

/// The consumer loop, run as a supervised episode.
pub struct CdcConsumer<F, C> {
    factory: F,
    engine: InvalidationEngine<C>,
    settings: EpisodeSettings,
    cancel: CancellationToken,
}

impl<F, C> CdcConsumer<F, C>
where
    F: BrokerFactory,
    C: CacheStore,
{
    pub fn new(
        factory: F,
        engine: InvalidationEngine<C>,
        settings: EpisodeSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            engine,
            settings,
            cancel,
        }
    }

    pub fn engine(&self) -> &InvalidationEngine<C> {
        &self.engine
    }

    /// Poll and process until something ends the episode.
    async fn consume(&self, client: &mut F::Client) -> ConsumerError {
        loop {
            if self.cancel.is_cancelled() {
                return ConsumerError::Cancelled;
            }

            let batch = match client.poll(self.settings.max_records).await {
                PollOutcome::Records(batch) => batch,
                PollOutcome::Empty => continue,
                PollOutcome::Closed(e) => {
                    if !e.is_cancellation() {
                        error!("Consumer client closed: {}", e);
                    }
                    return e;
                }
                PollOutcome::FetchErrors(errors) => {
                    if errors.is_empty() {
                        continue;
                    }
                    if errors.iter().any(FetchError::is_cancellation) {
                        return ConsumerError::Cancelled;
                    }
                    for e in &errors {
                        error!("Fetch error: {}", e);
                    }
                    return ConsumerError::FetchFailed(errors.len());
                }
            };

            let report = match self.engine.process_batch(client, &batch, &self.cancel).await {
                Ok(report) => report,
                Err(e) => return e,
            };

            if let Err(e) = client.commit_marked(self.settings.commit_timeout).await {
                error!("Failed to commit offsets: {}", e);
                return match e {
                    ConsumerError::Commit(_) => e,
                    other => ConsumerError::Commit(other.to_string()),
                };
            }

            debug!(
                records = batch.len(),
                marked = report.marked,
                invalidated = report.invalidated,
                skipped = report.skipped,
                "Batch committed"
            );
            drop(batch);
        }
    }

    /// Best-effort cleanup on every exit after a successful connect.
    async fn finish(&self, client: &mut F::Client, exit: &ConsumerError) {
        if client.pending_marks() > 0 {
            match client
                .commit_marked(self.settings.shutdown_commit_timeout)
                .await
            {
                Ok(partitions) => info!(partitions, "Final commit succeeded"),
                Err(e) => error!("Final commit failed: {}", e),
            }
        }

        if let Err(e) = client.leave_group(self.settings.leave_group_timeout).await {
            warn!("Failed to leave consumer group: {}", e);
        }

        let stats = self.engine.stats().snapshot();
        info!(
            invalidated = stats.invalidated,
            skipped = stats.skipped,
            errors = stats.errors,
            latency_p50_ms = stats.latency_p50_ms,
            latency_p99_ms = stats.latency_p99_ms,
            reason = %exit,
            "Consumer episode ended"
        );
    }
}

#[async_trait]
impl<F, C> Episode for CdcConsumer<F, C>
where
    F: BrokerFactory,
    C: CacheStore,
{
    type Error = ConsumerError;

    async fn run(&mut self) -> Result<()> {
        let mut client = self.factory.connect(&self.cancel).await?;
        info!("CDC cache invalidator running");

        let exit = self.consume(&mut client).await;
        self.finish(&mut client, &exit).await;
        Err(exit)
    }
}
