//! Error types for the job queue.

/// Errors returned by [`JobQueue`](crate::JobQueue) operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from Fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// A stored key or index entry does not have the expected shape.
    #[error("corrupt queue entry: {0}")]
    Corrupt(String),
}
