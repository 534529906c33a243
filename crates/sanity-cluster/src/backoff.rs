//! Jittered exponential backoff for requeued jobs.

use std::collections::BTreeMap;

use rand::Rng;
use sanity_types::Timestamp;
use serde::{Deserialize, Serialize};

/// Default minimum exponent: delays between 2^6 = 64s and 2^10 = 1024s.
pub const DEFAULT_BACKOFF_EXPONENT: u32 = 6;

/// Retries beyond this count no longer widen the jitter window.
const MAX_JITTER_STEPS: u32 = 4;

/// Delay in seconds before retry number `retry_count` may run.
///
/// `2^(exponent + r)` with `r` uniform in `[min_increase, min(retry_count, 4)]`,
/// where `min_increase` is 1 once more than one retry has happened.
pub fn backoff_delay(retry_count: u32, exponent: u32) -> u64 {
    backoff_delay_with(&mut rand::rng(), retry_count, exponent)
}

/// [`backoff_delay`] drawing its jitter from `rng`.
pub fn backoff_delay_with<R: Rng + ?Sized>(rng: &mut R, retry_count: u32, exponent: u32) -> u64 {
    let min_increase = u32::from(retry_count > 1);
    let max_increase = retry_count.min(MAX_JITTER_STEPS).max(min_increase);
    let r = rng.random_range(min_increase..=max_increase);
    2u64.saturating_pow(exponent + r)
}

/// Per-job-type backoff exponents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Exponent used for job types without an override.
    pub default_exponent: u32,
    /// Overrides keyed by job type name (e.g. `"checker_job"`).
    pub exponents: BTreeMap<String, u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            default_exponent: DEFAULT_BACKOFF_EXPONENT,
            exponents: BTreeMap::new(),
        }
    }
}

impl BackoffConfig {
    /// Exponent for a job type.
    pub fn exponent_for(&self, job_type: &str) -> u32 {
        self.exponents
            .get(job_type)
            .copied()
            .unwrap_or(self.default_exponent)
    }

    /// Backoff delay in seconds for a job type at `retry_count`.
    pub fn delay(&self, job_type: &str, retry_count: u32) -> u64 {
        backoff_delay(retry_count, self.exponent_for(job_type))
    }
}

/// Advisory release timestamp attached to a pushed job.
///
/// Queues may check it only periodically and keep a longer pre-existing
/// delay of a merged duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDelay {
    /// Earliest time the job should run.
    pub release_at: Timestamp,
}

impl JobDelay {
    /// Release `delay_secs` seconds after `now`.
    pub fn after(now: Timestamp, delay_secs: u64) -> Self {
        Self {
            release_at: now.saturating_add(delay_secs),
        }
    }
}
