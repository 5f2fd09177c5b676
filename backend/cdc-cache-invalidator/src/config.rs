use resilience::{BackoffPolicy, SupervisorConfig};
use serde::Deserialize;
use std::time::Duration;

use crate::consumer::KeyStrategy;
use crate::error::{ConsumerError, Result};

/// Consumer configuration, read once from the environment at startup.
///
/// Every field falls back to a default so the service can start against a
/// local docker-compose stack without any variables set.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_kafka_host")]
    pub kafka_host: String,
    #[serde(default = "default_kafka_broker_port")]
    pub kafka_broker_port: u16,
    /// Full bootstrap list; overrides host/port when set
    #[serde(default)]
    pub kafka_brokers: Option<String>,
    #[serde(default = "default_consumer_group")]
    pub kafka_consumer_group: String,
    #[serde(default = "default_cdc_topic")]
    pub kafka_cdc_topic: String,

    #[serde(default = "default_session_timeout_ms")]
    pub kafka_session_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub kafka_heartbeat_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub kafka_request_timeout_ms: u64,
    #[serde(default = "default_rebalance_timeout_ms")]
    pub kafka_rebalance_timeout_ms: u64,
    #[serde(default = "default_fetch_min_bytes")]
    pub kafka_fetch_min_bytes: u32,
    #[serde(default = "default_fetch_max_bytes")]
    pub kafka_fetch_max_bytes: u32,
    #[serde(default = "default_fetch_max_wait_ms")]
    pub kafka_fetch_max_wait_ms: u64,
    #[serde(default = "default_poll_max_records")]
    pub kafka_poll_max_records: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub kafka_poll_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub kafka_connect_timeout_ms: u64,

    #[serde(default = "default_5s")]
    pub commit_timeout_ms: u64,
    #[serde(default = "default_5s")]
    pub shutdown_commit_timeout_ms: u64,
    #[serde(default = "default_5s")]
    pub leave_group_timeout_ms: u64,
    #[serde(default = "default_5s")]
    pub shutdown_drain_timeout_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_5s")]
    pub supervisor_crash_delay_ms: u64,
    #[serde(default = "default_panic_delay_ms")]
    pub supervisor_panic_delay_ms: u64,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_cache_key_field")]
    pub cache_key_field: String,
    #[serde(default)]
    pub cache_key_prefix: Option<String>,
    #[serde(default = "default_cache_op_timeout_ms")]
    pub cache_op_timeout_ms: u64,
}

fn default_kafka_host() -> String {
    "localhost".to_string()
}
fn default_kafka_broker_port() -> u16 {
    9092
}
fn default_consumer_group() -> String {
    "cdc-cache-invalidator".to_string()
}
fn default_cdc_topic() -> String {
    "cdc.public.sinners".to_string()
}
fn default_session_timeout_ms() -> u64 {
    30_000
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_rebalance_timeout_ms() -> u64 {
    60_000
}
fn default_fetch_min_bytes() -> u32 {
    1024
}
fn default_fetch_max_bytes() -> u32 {
    10 * 1024 * 1024
}
fn default_fetch_max_wait_ms() -> u64 {
    5_000
}
fn default_poll_max_records() -> usize {
    100
}
fn default_poll_timeout_ms() -> u64 {
    1_000
}
fn default_connect_timeout_ms() -> u64 {
    60_000
}
fn default_5s() -> u64 {
    5_000
}
fn default_backoff_base_ms() -> u64 {
    3_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_panic_delay_ms() -> u64 {
    2_000
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_cache_key_field() -> String {
    "code".to_string()
}
fn default_cache_op_timeout_ms() -> u64 {
    3_000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            kafka_host: default_kafka_host(),
            kafka_broker_port: default_kafka_broker_port(),
            kafka_brokers: None,
            kafka_consumer_group: default_consumer_group(),
            kafka_cdc_topic: default_cdc_topic(),
            kafka_session_timeout_ms: default_session_timeout_ms(),
            kafka_heartbeat_interval_ms: default_heartbeat_interval_ms(),
            kafka_request_timeout_ms: default_request_timeout_ms(),
            kafka_rebalance_timeout_ms: default_rebalance_timeout_ms(),
            kafka_fetch_min_bytes: default_fetch_min_bytes(),
            kafka_fetch_max_bytes: default_fetch_max_bytes(),
            kafka_fetch_max_wait_ms: default_fetch_max_wait_ms(),
            kafka_poll_max_records: default_poll_max_records(),
            kafka_poll_timeout_ms: default_poll_timeout_ms(),
            kafka_connect_timeout_ms: default_connect_timeout_ms(),
            commit_timeout_ms: default_5s(),
            shutdown_commit_timeout_ms: default_5s(),
            leave_group_timeout_ms: default_5s(),
            shutdown_drain_timeout_ms: default_5s(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            supervisor_crash_delay_ms: default_5s(),
            supervisor_panic_delay_ms: default_panic_delay_ms(),
            redis_url: default_redis_url(),
            cache_key_field: default_cache_key_field(),
            cache_key_prefix: None,
            cache_op_timeout_ms: default_cache_op_timeout_ms(),
        }
    }
}

impl ConsumerConfig {
    /// Load from the process environment (and `.env` when present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config: Self =
            envy::from_env().map_err(|e| ConsumerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from explicit key/value pairs, using the same variable names.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self =
            envy::from_iter(pairs).map_err(|e| ConsumerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.brokers().trim().is_empty() {
            return Err(ConsumerError::Config("broker address is empty".into()));
        }
        if self.kafka_consumer_group.trim().is_empty() {
            return Err(ConsumerError::Config("KAFKA_CONSUMER_GROUP is empty".into()));
        }
        if self.kafka_cdc_topic.trim().is_empty() {
            return Err(ConsumerError::Config("KAFKA_CDC_TOPIC is empty".into()));
        }
        if self.kafka_heartbeat_interval_ms >= self.kafka_session_timeout_ms {
            return Err(ConsumerError::Config(format!(
                "heartbeat interval ({}ms) must be below session timeout ({}ms)",
                self.kafka_heartbeat_interval_ms, self.kafka_session_timeout_ms
            )));
        }
        if self.kafka_poll_max_records == 0 {
            return Err(ConsumerError::Config("KAFKA_POLL_MAX_RECORDS must be positive".into()));
        }
        if self.cache_key_field.trim().is_empty() {
            return Err(ConsumerError::Config("CACHE_KEY_FIELD is empty".into()));
        }
        Ok(())
    }

    /// Bootstrap servers: `KAFKA_BROKERS` or `KAFKA_HOST:KAFKA_BROKER_PORT`
    pub fn brokers(&self) -> String {
        match &self.kafka_brokers {
            Some(list) if !list.trim().is_empty() => list.clone(),
            _ => format!("{}:{}", self.kafka_host, self.kafka_broker_port),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            crash_delay: Duration::from_millis(self.supervisor_crash_delay_ms),
            panic_delay: Duration::from_millis(self.supervisor_panic_delay_ms),
        }
    }

    pub fn key_strategy(&self) -> KeyStrategy {
        KeyStrategy {
            field: self.cache_key_field.clone(),
            prefix: self.cache_key_prefix.clone().filter(|p| !p.is_empty()),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_poll_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_connect_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn shutdown_commit_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_commit_timeout_ms)
    }

    pub fn leave_group_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_group_timeout_ms)
    }

    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_timeout_ms)
    }

    pub fn cache_op_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_op_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = ConsumerConfig::from_pairs(Vec::new()).unwrap();

        assert_eq!(config.brokers(), "localhost:9092");
        assert_eq!(config.kafka_consumer_group, "cdc-cache-invalidator");
        assert_eq!(config.kafka_poll_max_records, 100);
        assert_eq!(config.commit_timeout(), Duration::from_secs(5));
        assert_eq!(config.backoff_policy().base, Duration::from_secs(3));
        assert_eq!(config.backoff_policy().max, Duration::from_secs(60));
        assert_eq!(config.supervisor_config().crash_delay, Duration::from_secs(5));
        assert_eq!(config.supervisor_config().panic_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_host_and_port_are_joined() {
        let config = ConsumerConfig::from_pairs(pairs(&[
            ("KAFKA_HOST", "kafka"),
            ("KAFKA_BROKER_PORT", "29092"),
            ("KAFKA_CONSUMER_GROUP", "cache-clearer"),
            ("KAFKA_CDC_TOPIC", "pg.public.sinners"),
        ]))
        .unwrap();

        assert_eq!(config.brokers(), "kafka:29092");
        assert_eq!(config.kafka_consumer_group, "cache-clearer");
        assert_eq!(config.kafka_cdc_topic, "pg.public.sinners");
    }

    #[test]
    fn test_broker_list_overrides_host() {
        let config = ConsumerConfig::from_pairs(pairs(&[
            ("KAFKA_HOST", "ignored"),
            ("KAFKA_BROKERS", "k1:9092,k2:9092"),
        ]))
        .unwrap();

        assert_eq!(config.brokers(), "k1:9092,k2:9092");
    }

    #[test]
    fn test_rejects_heartbeat_above_session_timeout() {
        let err = ConsumerConfig::from_pairs(pairs(&[
            ("KAFKA_SESSION_TIMEOUT_MS", "6000"),
            ("KAFKA_HEARTBEAT_INTERVAL_MS", "6000"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConsumerError::Config(_)));
    }

    #[test]
    fn test_rejects_empty_topic() {
        let err = ConsumerConfig::from_pairs(pairs(&[("KAFKA_CDC_TOPIC", " ")])).unwrap_err();
        assert!(err.to_string().contains("KAFKA_CDC_TOPIC"));
    }

    #[test]
    fn test_rejects_non_numeric_port() {
        let err = ConsumerConfig::from_pairs(pairs(&[("KAFKA_BROKER_PORT", "kafka")])).unwrap_err();
        assert!(matches!(err, ConsumerError::Config(_)));
    }

    #[test]
    fn test_empty_prefix_means_bare_keys() {
        let config = ConsumerConfig::from_pairs(pairs(&[("CACHE_KEY_PREFIX", "")])).unwrap();
        assert_eq!(config.key_strategy().prefix, None);

        let config = ConsumerConfig::from_pairs(pairs(&[
            ("CACHE_KEY_PREFIX", "sinner"),
            ("CACHE_KEY_FIELD", "id"),
        ]))
        .unwrap();
        let strategy = config.key_strategy();
        assert_eq!(strategy.prefix.as_deref(), Some("sinner"));
        assert_eq!(strategy.field, "id");
    }

    #[test]
    fn test_default_matches_empty_environment() {
        let from_env = ConsumerConfig::from_pairs(Vec::new()).unwrap();
        let default = ConsumerConfig::default();
        assert_eq!(from_env.brokers(), default.brokers());
        assert_eq!(from_env.kafka_fetch_max_bytes, default.kafka_fetch_max_bytes);
        assert_eq!(from_env.redis_url, default.redis_url);
    }
}
