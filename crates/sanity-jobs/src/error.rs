//! Error types for job execution.

use crate::profile::ProfileError;

/// Errors that can occur while executing or scheduling jobs.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Failed to access the durable queue.
    #[error("queue error: {0}")]
    Queue(#[from] sanity_queue::QueueError),

    /// Failed to resolve target clusters.
    #[error("cluster error: {0}")]
    Cluster(#[from] sanity_cluster::ClusterError),

    /// Failed to read from the page store or an index.
    #[error("store error: {0}")]
    Store(#[from] sanity_store::StoreError),

    /// A checker could not verify a batch.
    #[error("check error: {0}")]
    Check(#[from] sanity_repair::CheckError),

    /// A remediator failed.
    #[error("repair error: {0}")]
    Repair(#[from] sanity_repair::RepairError),

    /// A sanitization profile is unusable.
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),

    /// A single-cluster write resolved to the wrong number of clusters.
    #[error("write for {} resolved to {count} clusters, expected exactly 1", describe(.cluster))]
    ClusterCount {
        /// Cluster named by the job.
        cluster: Option<String>,
        /// Number of connections resolved.
        count: usize,
    },

    /// A stored loop was created for a different cluster selection.
    #[error(
        "job cluster mismatch: stored job works on {}, requested {}",
        describe(.stored),
        describe(.requested)
    )]
    ClusterMismatch {
        /// Cluster of the stored loop.
        stored: Option<String>,
        /// Cluster asked for by the caller.
        requested: Option<String>,
    },

    /// The checker queue is already full.
    #[error("too many checker jobs: {pending} in the queue, {max} allowed")]
    TooManyCheckerJobs {
        /// Checker jobs already queued.
        pending: usize,
        /// Configured maximum.
        max: u64,
    },

    /// No cluster currently accepts writes.
    #[error("no writable cluster")]
    NoWritableClusters,

    /// The page store holds no page.
    #[error("page store is empty")]
    EmptyPageStore,

    /// No profile is large enough for the page-id span.
    #[error("no sanitization profile found for {span} ids")]
    NoProfile {
        /// Width of the page-id space.
        span: u64,
    },

    /// No loop is stored under this name.
    #[error("unknown loop {0}")]
    UnknownLoop(String),
}

impl JobError {
    /// Whether running the same job again could succeed.
    ///
    /// A job aimed at a cluster that is not writable, or that resolves to
    /// the wrong number of clusters, fails the same way until an operator
    /// changes the configuration.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cluster(sanity_cluster::ClusterError::NotWritable(_)) | Self::ClusterCount { .. }
        )
    }
}

fn describe(cluster: &Option<String>) -> &str {
    cluster.as_deref().unwrap_or("all writable clusters")
}
