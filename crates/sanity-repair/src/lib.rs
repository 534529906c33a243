//! Divergence detection and remediation.
//!
//! This crate provides:
//!
//! - [`RepairAction`]: one concrete divergence between the page store and
//!   an index cluster, and [`apply`] to hand it to a [`Remediator`].
//! - [`Remediator`] and its variants: [`QueueingRemediator`],
//!   [`AllClustersQueueingRemediator`], [`BufferedRemediator`],
//!   [`NoopRemediator`], [`PrintingRemediator`].
//! - [`Checker`]: compares a batch of page ids against one cluster and
//!   emits actions.
//! - [`MultiClusterRemediatorHelper`]: collapses identical per-cluster
//!   repairs into a single all-clusters job.
//! - [`MetricsSink`]: where the checker reports its counters.

pub mod action;
pub mod checker;
pub mod error;
pub mod helper;
pub mod metrics;
pub mod remediator;

pub use action::{RepairAction, apply};
pub use checker::{Checker, IsOldFn, PageCache};
pub use error::{CheckError, RepairError};
pub use helper::{BatchRoute, MultiClusterRemediatorHelper};
pub use metrics::{InMemoryMetrics, MetricsSink, TracingMetrics};
pub use remediator::{
    AllClustersQueueingRemediator, AllClustersRemediator, BufferedRemediator, NoopRemediator,
    PrintingRemediator, QueueingRemediator, Remediator,
};
