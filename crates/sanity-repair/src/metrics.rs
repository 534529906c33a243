//! Counters reported by the checker.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

/// Destination for named counters.
pub trait MetricsSink: Send + Sync {
    /// Add `value` to the counter `key`.
    fn update_count(&self, key: &str, value: u64);
}

/// Emits counters as `tracing` events on the `sanity::metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn update_count(&self, key: &str, value: u64) {
        debug!(target: "sanity::metrics", key, value, "counter");
    }
}

/// Accumulates counters in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl InMemoryMetrics {
    /// An empty set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, zero if never updated.
    pub fn get(&self, key: &str) -> u64 {
        let counters = self.counters.lock().expect("lock poisoned");
        counters.get(key).copied().unwrap_or(0)
    }

    /// Snapshot of every counter.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters.lock().expect("lock poisoned").clone()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn update_count(&self, key: &str, value: u64) {
        let mut counters = self.counters.lock().expect("lock poisoned");
        *counters.entry(key.to_string()).or_default() += value;
    }
}
