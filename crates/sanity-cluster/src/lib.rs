//! Cluster selection and retry backoff shared by every job type.
//!
//! This crate provides:
//!
//! - [`ClusterAssignment`]: the live set of index clusters and
//!   [`decide_clusters`](ClusterAssignment::decide_clusters), which resolves a
//!   job's `cluster` parameter into connections.
//! - [`backoff_delay`] and [`BackoffConfig`]: jittered exponential delays for
//!   requeued jobs, plus [`JobDelay`] for the advisory release timestamp.

mod assignment;
mod backoff;
mod error;

#[cfg(test)]
mod tests;

pub use assignment::{
    ClusterAssignment, ClusterConfig, Connection, ExternalIndex, SelectionOptions,
};
pub use backoff::{
    BackoffConfig, DEFAULT_BACKOFF_EXPONENT, JobDelay, backoff_delay, backoff_delay_with,
};
pub use error::ClusterError;
