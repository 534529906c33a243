//! Error types for checking and remediation.

use sanity_store::StoreError;

/// Errors raised while turning a repair action into queued work.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// The corrective job could not be pushed.
    #[error("queue error: {0}")]
    Queue(#[from] sanity_queue::QueueError),
}

/// Errors raised by [`Checker::check`](crate::Checker::check).
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The index documents could not be fetched from the cluster. The batch
    /// was not classified; nothing was emitted.
    #[error("cannot fetch ids from index on {cluster}: {source}")]
    Fetch {
        /// Cluster whose read failed.
        cluster: String,
        /// Underlying client error.
        #[source]
        source: StoreError,
    },

    /// The canonical page store failed.
    #[error("page store error: {0}")]
    PageStore(#[from] StoreError),

    /// A remediator refused an action.
    #[error("remediation failed: {0}")]
    Remediation(#[from] RepairError),
}
