//! Collaborators shared by every job execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use sanity_cluster::{BackoffConfig, ClusterAssignment, ExternalIndex, SelectionOptions};
use sanity_queue::JobQueue;
use sanity_repair::{MetricsSink, TracingMetrics};
use sanity_store::PageStore;
use sanity_types::{IndexConfig, WriteOperation};

use crate::clock::{Clock, SystemClock};
use crate::elastica_write::WriteConfig;
use crate::pressure::PressureGauge;
use crate::profile::ProfileRepository;

/// Everything a job needs besides its own parameters.
///
/// Built once per worker; jobs only borrow it.
pub struct JobContext {
    /// Durable queue jobs are claimed from and pushed to.
    pub queue: Arc<JobQueue>,
    /// Canonical page store.
    pub pages: Arc<dyn PageStore>,
    /// Live cluster configuration.
    pub clusters: Arc<ClusterAssignment>,
    /// Document id and index naming.
    pub index_config: IndexConfig,
    /// Sanitization profiles.
    pub profiles: ProfileRepository,
    /// Backoff exponents per job type.
    pub backoff: BackoffConfig,
    /// Retry ceilings of single-cluster writes.
    pub write: WriteConfig,
    /// Update backlog gauge.
    pub pressure: Arc<dyn PressureGauge>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Counter sink for checkers.
    pub metrics: Arc<dyn MetricsSink>,
    /// Log every page a checker finds sane.
    pub log_sane: bool,
    /// Other wikis' indices, by name, with their cluster constraints.
    pub external_indices: BTreeMap<String, ExternalIndex>,
}

impl JobContext {
    /// Context with default settings, measuring pressure on `queue`.
    pub fn new(
        queue: Arc<JobQueue>,
        pages: Arc<dyn PageStore>,
        clusters: Arc<ClusterAssignment>,
    ) -> Self {
        Self {
            pressure: queue.clone(),
            queue,
            pages,
            clusters,
            index_config: IndexConfig::default(),
            profiles: ProfileRepository::builtin(),
            backoff: BackoffConfig::default(),
            write: WriteConfig::default(),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(TracingMetrics),
            log_sane: false,
            external_indices: BTreeMap::new(),
        }
    }

    /// Set the index layout.
    pub fn index_config(mut self, index_config: IndexConfig) -> Self {
        self.index_config = index_config;
        self
    }

    /// Set the profile repository.
    pub fn profiles(mut self, profiles: ProfileRepository) -> Self {
        self.profiles = profiles;
        self
    }

    /// Set the backoff exponents.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the write retry ceilings.
    pub fn write_config(mut self, write: WriteConfig) -> Self {
        self.write = write;
        self
    }

    /// Replace the pressure gauge.
    pub fn pressure(mut self, pressure: Arc<dyn PressureGauge>) -> Self {
        self.pressure = pressure;
        self
    }

    /// Replace the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Log sane pages at debug level.
    pub fn log_sane(mut self, log_sane: bool) -> Self {
        self.log_sane = log_sane;
        self
    }

    /// Register another wiki's index.
    pub fn external_index(mut self, index: ExternalIndex) -> Self {
        self.external_indices.insert(index.name.clone(), index);
        self
    }

    /// How clusters are narrowed for `operation`.
    ///
    /// Writes to a private index suffix go to private clusters only; updates
    /// of a registered foreign index honour its cluster constraints.
    pub fn selection_for(&self, operation: &WriteOperation) -> SelectionOptions {
        match operation {
            WriteOperation::SendData { index_suffix, .. }
            | WriteOperation::SendDeletes {
                index_suffix: Some(index_suffix),
                ..
            } => SelectionOptions {
                private_only: self.index_config.is_private_suffix(index_suffix),
                external_index: None,
            },
            WriteOperation::SendDeletes {
                index_suffix: None, ..
            } => SelectionOptions::default(),
            WriteOperation::SendOtherIndexUpdates { index, .. } => SelectionOptions {
                private_only: false,
                external_index: self.external_indices.get(index).cloned(),
            },
        }
    }
}
