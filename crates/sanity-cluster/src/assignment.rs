//! Live cluster configuration and per-job cluster resolution.
//!
//! [`ClusterAssignment`] is the shared, read-mostly view of which index
//! clusters exist and which of them currently accept writes. Jobs never hold
//! on to it across executions: every run calls
//! [`decide_clusters`](ClusterAssignment::decide_clusters) again so config
//! changes take effect on the next attempt.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use sanity_store::IndexClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ClusterError;

/// Static description of one index cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name (e.g. `"eqiad"`).
    pub name: String,
    /// Whether jobs may write to it.
    #[serde(default = "default_true")]
    pub writable: bool,
    /// Whether it may hold privacy-sensitive indices.
    #[serde(default)]
    pub private: bool,
}

fn default_true() -> bool {
    true
}

/// An index used by another wiki, with its own cluster constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalIndex {
    /// Name of the external index.
    pub name: String,
    /// Clusters that do not host this index.
    pub cluster_blacklist: BTreeSet<String>,
    /// Replica group the index lives in, overriding the default.
    pub replica_group: Option<String>,
}

/// Narrowing applied on top of the writable set.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    /// Keep only clusters flagged private.
    pub private_only: bool,
    /// Restrict to clusters hosting this external index.
    pub external_index: Option<ExternalIndex>,
}

/// A resolved connection to one cluster, valid for one job execution.
#[derive(Clone)]
pub struct Connection {
    /// Cluster name.
    pub name: String,
    /// Client for the cluster.
    pub client: Arc<dyn IndexClient>,
    /// Deadline applied to every write through this connection.
    pub write_timeout: Duration,
    /// Replica group override for this call, if any.
    pub replica_group: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("write_timeout", &self.write_timeout)
            .field("replica_group", &self.replica_group)
            .finish_non_exhaustive()
    }
}

struct ClusterEntry {
    config: ClusterConfig,
    client: Arc<dyn IndexClient>,
}

/// The live set of index clusters.
pub struct ClusterAssignment {
    clusters: RwLock<BTreeMap<String, ClusterEntry>>,
    write_timeout: Duration,
}

impl ClusterAssignment {
    /// Create an empty assignment; every connection gets `write_timeout`.
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            clusters: RwLock::new(BTreeMap::new()),
            write_timeout,
        }
    }

    /// Register (or replace) a cluster.
    pub fn add_cluster(&self, config: ClusterConfig, client: Arc<dyn IndexClient>) {
        debug!(
            cluster = %config.name,
            writable = config.writable,
            private = config.private,
            "registered cluster"
        );
        let mut clusters = self.clusters.write().expect("lock poisoned");
        clusters.insert(config.name.clone(), ClusterEntry { config, client });
    }

    /// Remove a cluster from the live configuration.
    pub fn remove_cluster(&self, name: &str) {
        let mut clusters = self.clusters.write().expect("lock poisoned");
        if clusters.remove(name).is_some() {
            debug!(cluster = name, "removed cluster");
        }
    }

    /// Flip the writable flag of a cluster. Returns `false` if it is unknown.
    pub fn set_writable(&self, name: &str, writable: bool) -> bool {
        let mut clusters = self.clusters.write().expect("lock poisoned");
        match clusters.get_mut(name) {
            Some(entry) => {
                entry.config.writable = writable;
                true
            }
            None => false,
        }
    }

    /// Names of all clusters currently accepting writes.
    pub fn writable_clusters(&self) -> BTreeSet<String> {
        let clusters = self.clusters.read().expect("lock poisoned");
        clusters
            .values()
            .filter(|entry| entry.config.writable)
            .map(|entry| entry.config.name.clone())
            .collect()
    }

    /// Configuration of every known cluster.
    pub fn clusters(&self) -> Vec<ClusterConfig> {
        let clusters = self.clusters.read().expect("lock poisoned");
        clusters.values().map(|entry| entry.config.clone()).collect()
    }

    /// Deadline applied to writes.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Resolve a job's `cluster` parameter into connections.
    ///
    /// `None` targets every writable cluster. A named cluster must be
    /// present and writable, otherwise [`ClusterError::NotWritable`] is
    /// returned. `options` then narrows the set. The result may be empty.
    pub fn decide_clusters(
        &self,
        cluster: Option<&str>,
        options: &SelectionOptions,
    ) -> Result<BTreeMap<String, Connection>, ClusterError> {
        let clusters = self.clusters.read().expect("lock poisoned");

        let candidates: Vec<&ClusterEntry> = match cluster {
            None => clusters.values().filter(|e| e.config.writable).collect(),
            Some(name) => match clusters.get(name) {
                Some(entry) if entry.config.writable => vec![entry],
                _ => {
                    warn!(cluster = name, "job targets a cluster that is not writable");
                    return Err(ClusterError::NotWritable(name.to_string()));
                }
            },
        };

        let replica_group = options
            .external_index
            .as_ref()
            .and_then(|external| external.replica_group.clone());
        let resolved = candidates
            .into_iter()
            .filter(|entry| !options.private_only || entry.config.private)
            .filter(|entry| match &options.external_index {
                Some(external) => !external.cluster_blacklist.contains(&entry.config.name),
                None => true,
            });

        Ok(resolved
            .map(|entry| {
                let connection = Connection {
                    name: entry.config.name.clone(),
                    client: entry.client.clone(),
                    write_timeout: self.write_timeout,
                    replica_group: replica_group.clone(),
                };
                (entry.config.name.clone(), connection)
            })
            .collect())
    }
}

impl std::fmt::Debug for ClusterAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterAssignment")
            .field("writable", &self.writable_clusters())
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}
