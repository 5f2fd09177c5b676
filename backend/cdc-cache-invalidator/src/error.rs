use cache_invalidation::InvalidationError;
use rdkafka::error::KafkaError;
use resilience::Terminal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsumerError>;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Shutdown in progress. Never restarted.
    #[error("consumer cancelled")]
    Cancelled,

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Failed to create Kafka client: {0}")]
    ClientCreation(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("too many fetch errors ({0})")]
    FetchFailed(usize),

    #[error("Cache invalidation failed for key {key}: {source}")]
    Invalidation {
        key: String,
        #[source]
        source: InvalidationError,
    },

    #[error("Failed to commit offsets: {0}")]
    Commit(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsumerError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConsumerError::Cancelled)
    }
}

impl Terminal for ConsumerError {
    fn is_terminal(&self) -> bool {
        self.is_cancellation()
    }
}
