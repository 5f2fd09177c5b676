//! CDC-driven cache invalidation
//!
//! Consumes Debezium change events for the cached table and deletes the cache
//! entry of every updated or deleted row, so the next read repopulates it
//! from the database. Offsets are committed only after the deletion for a
//! record succeeded, giving at-least-once invalidation.

pub mod broker;
pub mod cdc;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use config::ConsumerConfig;
pub use consumer::{
    BatchReport, CdcConsumer, EpisodeSettings, InvalidationEngine, KeyStrategy, RecordDisposition,
};
pub use error::{ConsumerError, Result};
pub use shutdown::{shutdown_signal, DrainOutcome, ShutdownCoordinator};
