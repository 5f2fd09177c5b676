use anyhow::{Context, Result};
use cache_invalidation::RedisCacheStore;
use cdc_cache_invalidator::broker::KafkaBrokerFactory;
use cdc_cache_invalidator::logging::{init_tracing, install_panic_hook};
use cdc_cache_invalidator::{
    shutdown_signal, CdcConsumer, ConsumerConfig, EpisodeSettings, InvalidationEngine,
    ShutdownCoordinator,
};
use resilience::{with_retry, RetryConfig, Supervisor};
use tracing::{error, info, warn};

/// CDC Cache Invalidator
///
/// Keeps the read-through Redis cache consistent with PostgreSQL by deleting
/// the entry of every row that Debezium reports as updated or deleted.
///
/// # Flow
///
/// ```text
/// PostgreSQL WAL → Debezium → Kafka (cdc.public.<table>) → this service → Redis DEL
/// ```
///
/// The consumer runs under a supervisor that restarts it after failures and
/// panics; SIGINT/SIGTERM cancels it, commits what was handled and leaves the
/// consumer group before the process exits.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    install_panic_hook();

    let config = ConsumerConfig::from_env().context("Failed to load configuration")?;
    info!(
        brokers = %config.brokers(),
        group = %config.kafka_consumer_group,
        topic = %config.kafka_cdc_topic,
        "Starting CDC cache invalidator"
    );

    let coordinator = ShutdownCoordinator::new(config.shutdown_drain_timeout());
    let cancel = coordinator.cancel_token();

    let retry = RetryConfig {
        policy: config.backoff_policy(),
        max_elapsed: config.connect_timeout(),
    };
    let cache_config = &config;
    let connect_cache = with_retry(&retry, || async move {
        let cache =
            RedisCacheStore::new(&cache_config.redis_url, cache_config.cache_op_timeout()).await?;
        cache.ping().await?;
        Ok::<_, cache_invalidation::InvalidationError>(cache)
    });

    let cache = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown requested during startup");
            return Ok(());
        }
        cache = connect_cache => cache.context("Failed to connect to Redis")?,
    };
    info!("Connected to Redis");

    let engine = InvalidationEngine::new(cache, config.key_strategy());
    let mut consumer = CdcConsumer::new(
        KafkaBrokerFactory::new(config.clone()),
        engine,
        EpisodeSettings::from(&config),
        cancel.clone(),
    );
    let supervisor = Supervisor::new(
        "cdc-cache-invalidator",
        config.supervisor_config(),
        cancel.clone(),
    );

    let mut runner = coordinator.spawn(async move {
        let report = supervisor.run(&mut consumer).await;
        let stats = consumer.engine().stats().snapshot();
        info!(
            episodes = report.episodes,
            restarts = report.restarts,
            panics = report.panics,
            invalidated = stats.invalidated,
            skipped = stats.skipped,
            errors = stats.errors,
            "Consumer stopped"
        );
        report
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        finished = &mut runner => match finished {
            Ok(report) => warn!(stopped_by = ?report.stopped_by, "Consumer stopped before shutdown was requested"),
            Err(e) => error!("Consumer task failed: {}", e),
        },
    }

    coordinator.drain().await;
    info!("CDC cache invalidator stopped");
    Ok(())
}
