//! Statistics tracking for cache invalidation operations

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for invalidation operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvalidationStats {
    /// Keys deleted (whether or not they were present)
    pub invalidated: u64,
    /// Records that required no deletion (tombstones, inserts, malformed payloads)
    pub skipped: u64,
    /// Deletions that failed
    pub errors: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
}

/// Thread-safe statistics collector
#[derive(Clone)]
pub struct StatsCollector {
    invalidated: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    latencies: Arc<std::sync::Mutex<Vec<f64>>>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    /// Create new statistics collector
    pub fn new() -> Self {
        Self {
            invalidated: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
            latencies: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Record a completed deletion and its latency in milliseconds
    pub fn record_invalidation(&self, latency_ms: f64) {
        self.invalidated.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut latencies) = self.latencies.lock() {
            latencies.push(latency_ms);
            // Bounded sample window
            if latencies.len() > 1000 {
                latencies.drain(0..500);
            }
        }
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> InvalidationStats {
        let (p50, p99) = match self.latencies.lock() {
            Ok(latencies) if !latencies.is_empty() => {
                let mut sorted = latencies.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let last = sorted.len() - 1;
                let p50_idx = ((sorted.len() as f64 * 0.50) as usize).min(last);
                let p99_idx = ((sorted.len() as f64 * 0.99) as usize).min(last);
                (sorted[p50_idx], sorted[p99_idx])
            }
            _ => (0.0, 0.0),
        };

        InvalidationStats {
            invalidated: self.invalidated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            latency_p50_ms: p50,
            latency_p99_ms: p99,
        }
    }
}
