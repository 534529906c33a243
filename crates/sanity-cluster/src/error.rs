//! Error types for the cluster crate.

/// Errors produced while resolving target clusters.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// A job named a cluster that is absent from the live configuration or
    /// not currently writable.
    #[error("cluster {0} is not writable")]
    NotWritable(String),
}
