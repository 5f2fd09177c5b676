//! Cache invalidation against a shared Redis cache
//!
//! The read path populates the cache on a miss; writers never touch it.
//! Invalidators react to row changes by deleting the affected key so the next
//! read repopulates from the database.
//!
//! ```text
//! Row change (UPDATE/DELETE) → CDC topic → invalidator:
//!   1. Derive key from the row's pre-image identity
//!   2. DEL <key> on Redis
//!   3. Next read misses and repopulates from PostgreSQL
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cache_invalidation::{build_cache_key, CacheStore, RedisCacheStore};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedisCacheStore::new("redis://localhost:6379", Duration::from_secs(3)).await?;
//!
//!     let removed = cache.delete(&build_cache_key(None, "42")).await?;
//!     println!("removed {} entries", removed);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

mod error;
mod helpers;
mod stats;

pub use error::InvalidationError;
pub use helpers::build_cache_key;
pub use stats::{InvalidationStats, StatsCollector};

pub type Result<T> = std::result::Result<T, InvalidationError>;

/// Key-value cache that supports deleting a single key.
///
/// Deletions are idempotent and commute, so implementations need no
/// cross-call locking.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Delete `key`, returning the number of entries removed.
    async fn delete(&self, key: &str) -> Result<u64>;
}

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    async fn delete(&self, key: &str) -> Result<u64> {
        (**self).delete(key).await
    }
}

/// Redis-backed cache store
#[derive(Clone)]
pub struct RedisCacheStore {
    client: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCacheStore {
    /// Open a managed connection to `redis_url`.
    pub async fn new(redis_url: &str, op_timeout: Duration) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self::from_manager(connection, op_timeout))
    }

    pub fn from_manager(client: ConnectionManager, op_timeout: Duration) -> Self {
        Self { client, op_timeout }
    }

    /// Round-trip a PING to confirm the cache is reachable.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.client.clone();
        tokio::time::timeout(
            self.op_timeout,
            redis::cmd("PING").query_async::<_, String>(&mut conn),
        )
        .await
        .map_err(|_| InvalidationError::Timeout(format!("PING after {:?}", self.op_timeout)))??;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.client.clone();
        let removed: u64 = tokio::time::timeout(self.op_timeout, conn.del(key))
            .await
            .map_err(|_| {
                InvalidationError::Timeout(format!("DEL {} after {:?}", key, self.op_timeout))
            })??;

        debug!(key = %key, removed, "Cache key deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCache {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CacheStore for RecordingCache {
        async fn delete(&self, key: &str) -> Result<u64> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_arc_delegates_to_inner_store() {
        let inner = Arc::new(RecordingCache::default());
        let store: Arc<dyn CacheStore> = inner.clone();

        assert_eq!(store.delete("42").await.unwrap(), 1);
        assert_eq!(store.clone().delete("43").await.unwrap(), 1);

        assert_eq!(*inner.deleted.lock().unwrap(), vec!["42", "43"]);
    }
}
