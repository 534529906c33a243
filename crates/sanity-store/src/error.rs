//! Error types for page-store and index operations.

/// Errors that can occur talking to the page store or an index cluster.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or dropped the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with something we cannot interpret.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The request did not complete within its deadline.
    #[error("request timed out after {0}ms")]
    Timeout(u64),
}
