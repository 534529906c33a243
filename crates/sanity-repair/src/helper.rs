//! Cross-cluster batching of repairs.
//!
//! Every cluster checked by a job records its actions into its own
//! [`BufferedRemediator`]. When all clusters found exactly the same problems
//! and those clusters are every writable cluster, the batch goes out once
//! through the all-clusters remediator instead of once per cluster.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::RepairError;
use crate::remediator::{AllClustersRemediator, BufferedRemediator, Remediator};

/// Which path a batch was sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRoute {
    /// One replay on the all-clusters remediator.
    AllClusters,
    /// One replay per cluster on its own remediator.
    PerCluster,
}

struct ClusterSlot {
    remediator: Box<dyn Remediator>,
    buffer: BufferedRemediator,
}

/// Owns the per-cluster buffers and decides how each batch is sent.
pub struct MultiClusterRemediatorHelper {
    clusters: BTreeMap<String, ClusterSlot>,
    all_clusters: Box<dyn AllClustersRemediator>,
}

impl MultiClusterRemediatorHelper {
    /// Helper falling back to `all_clusters` when buffers agree.
    pub fn new(all_clusters: Box<dyn AllClustersRemediator>) -> Self {
        Self {
            clusters: BTreeMap::new(),
            all_clusters,
        }
    }

    /// Register a cluster and the remediator its buffered actions go to.
    pub fn add_cluster(&mut self, name: impl Into<String>, remediator: Box<dyn Remediator>) {
        self.clusters.insert(
            name.into(),
            ClusterSlot {
                remediator,
                buffer: BufferedRemediator::new(),
            },
        );
    }

    /// The buffer a checker for `cluster` should write into.
    pub fn buffer_mut(&mut self, cluster: &str) -> Option<&mut BufferedRemediator> {
        self.clusters.get_mut(cluster).map(|slot| &mut slot.buffer)
    }

    /// Stop tracking a cluster, discarding its buffer.
    pub fn remove_cluster(&mut self, cluster: &str) {
        self.clusters.remove(cluster);
    }

    /// Names of the clusters still tracked.
    pub fn cluster_names(&self) -> BTreeSet<String> {
        self.clusters.keys().cloned().collect()
    }

    /// Flush every buffer and clear them.
    ///
    /// Buffers are cleared whichever route is taken, including when a
    /// replay fails.
    pub fn send_batch(&mut self) -> Result<BatchRoute, RepairError> {
        let names = self.cluster_names();
        let mut buffers = self.clusters.values().map(|slot| &slot.buffer);
        let all_equal = match buffers.next() {
            Some(first) => buffers.all(|buffer| buffer == first),
            None => false,
        };

        let result = if all_equal && self.all_clusters.can_send_optimized_job(&names) {
            self.send_optimized().map(|()| BatchRoute::AllClusters)
        } else {
            self.send_per_cluster().map(|()| BatchRoute::PerCluster)
        };

        for slot in self.clusters.values_mut() {
            slot.buffer.clear();
        }
        if let Ok(route) = &result {
            debug!(?route, clusters = names.len(), "sent repair batch");
        }
        result
    }

    fn send_optimized(&mut self) -> Result<(), RepairError> {
        match self.clusters.values().next() {
            Some(slot) => slot.buffer.replay(self.all_clusters.as_mut()),
            None => Ok(()),
        }
    }

    fn send_per_cluster(&mut self) -> Result<(), RepairError> {
        for slot in self.clusters.values_mut() {
            slot.buffer.replay(slot.remediator.as_mut())?;
        }
        Ok(())
    }
}
