//! An [`IndexClient`] wrapper that injects latency, failures and freezes.
//!
//! `FlakyIndex` wraps any `Arc<dyn IndexClient>` and, before each call,
//! sleeps for a random duration and may short-circuit with a failure. The
//! RNG is seeded so chaos runs are reproducible.
//!
//! # Example
//!
//! ```ignore
//! let flaky = FlakyIndex::new(inner)
//!     .latency(5, 20)         // 5–20 ms per call
//!     .read_failure_rate(0.1) // 10% of gets fail
//!     .frozen_rate(0.2)       // 20% of writes answer Frozen
//!     .seed(42);
//! ```

use std::sync::{Arc, Mutex};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sanity_types::{DocId, IndexDocument, WriteOperation};

use crate::error::StoreError;
use crate::traits::{IndexClient, WriteStatus};

/// An [`IndexClient`] wrapper that misbehaves at configurable rates.
pub struct FlakyIndex {
    inner: Arc<dyn IndexClient>,
    latency_ms: (u64, u64),
    read_failure_rate: f64,
    write_failure_rate: f64,
    frozen_rate: f64,
    rng: Mutex<StdRng>,
}

impl FlakyIndex {
    /// Wrap an existing client; pass-through until configured.
    pub fn new(inner: Arc<dyn IndexClient>) -> Self {
        Self {
            inner,
            latency_ms: (0, 0),
            read_failure_rate: 0.0,
            write_failure_rate: 0.0,
            frozen_rate: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Set the per-call latency range in milliseconds (uniform random).
    pub fn latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms);
        self
    }

    /// Probability that a `get` fails with a transport error.
    pub fn read_failure_rate(mut self, rate: f64) -> Self {
        self.read_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Probability that a write is rejected with [`WriteStatus::Failed`].
    pub fn write_failure_rate(mut self, rate: f64) -> Self {
        self.write_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Probability that a write answers [`WriteStatus::Frozen`].
    pub fn frozen_rate(mut self, rate: f64) -> Self {
        self.frozen_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.rng.lock().expect("lock poisoned").random_bool(rate)
    }

    async fn delay(&self) {
        let (min, max) = self.latency_ms;
        if max == 0 {
            return;
        }
        let ms = if min >= max {
            min
        } else {
            self.rng
                .lock()
                .expect("lock poisoned")
                .random_range(min..=max)
        };
        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl IndexClient for FlakyIndex {
    async fn get(&self, doc_ids: &[DocId]) -> Result<Vec<IndexDocument>, StoreError> {
        self.delay().await;
        if self.roll(self.read_failure_rate) {
            return Err(StoreError::Transport("injected read failure".to_string()));
        }
        self.inner.get(doc_ids).await
    }

    async fn write(&self, operation: &WriteOperation) -> Result<WriteStatus, StoreError> {
        self.delay().await;
        if self.roll(self.frozen_rate) {
            return Ok(WriteStatus::Frozen);
        }
        if self.roll(self.write_failure_rate) {
            return Ok(WriteStatus::Failed("injected write failure".to_string()));
        }
        self.inner.write(operation).await
    }
}
