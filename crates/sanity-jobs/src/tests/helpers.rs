//! Shared test utilities for sanity-jobs tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sanity_cluster::{ClusterAssignment, ClusterConfig};
use sanity_queue::JobQueue;
use sanity_store::{IndexClient, MemoryIndex, MemoryPageStore};
use sanity_types::{IndexConfig, PageId, PageRecord, Timestamp};

use crate::clock::ManualClock;
use crate::context::JobContext;
use crate::error::JobError;
use crate::pressure::PressureGauge;
use crate::profile::{ProfileRepository, RawProfile};

pub const NOW: Timestamp = 1_700_000_000;

/// A store, a queue and one in-memory index per cluster.
pub struct Fixture {
    pub queue: Arc<JobQueue>,
    pub pages: Arc<MemoryPageStore>,
    pub clusters: Arc<ClusterAssignment>,
    pub indices: BTreeMap<String, Arc<MemoryIndex>>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    /// Writable clusters with the given names, all backed by [`MemoryIndex`].
    pub fn new(cluster_names: &[&str]) -> Self {
        let clusters = Arc::new(ClusterAssignment::new(Duration::from_secs(5)));
        let mut indices = BTreeMap::new();
        for name in cluster_names {
            let index = Arc::new(MemoryIndex::new(IndexConfig::default()));
            clusters.add_cluster(writable(name), index.clone());
            indices.insert(name.to_string(), index);
        }
        Self {
            queue: Arc::new(JobQueue::open_temporary().unwrap()),
            pages: Arc::new(MemoryPageStore::new()),
            clusters,
            indices,
            clock: Arc::new(ManualClock::new(NOW)),
        }
    }

    /// Register an extra writable cluster backed by an arbitrary client.
    pub fn add_client(&self, name: &str, private: bool, client: Arc<dyn IndexClient>) {
        let mut config = writable(name);
        config.private = private;
        self.clusters.add_cluster(config, client);
    }

    pub fn index(&self, name: &str) -> &Arc<MemoryIndex> {
        &self.indices[name]
    }

    /// Context using the test profiles and this fixture's clock.
    pub fn context(&self) -> JobContext {
        JobContext::new(self.queue.clone(), self.pages.clone(), self.clusters.clone())
            .profiles(test_profiles())
            .clock(self.clock.clone())
    }

    /// Insert content pages `ids`, each at revision `id * 10`.
    pub fn populate(&self, ids: impl IntoIterator<Item = PageId>) {
        for id in ids {
            self.pages.insert(page(id, 0, &format!("Page {id}"), id * 10));
        }
    }
}

fn writable(name: &str) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        writable: true,
        private: false,
    }
}

pub fn page(id: PageId, namespace: i32, title: &str, rev: u64) -> PageRecord {
    PageRecord {
        page_id: id,
        namespace,
        title: title.to_string(),
        latest_revision_id: rev,
        is_redirect: false,
    }
}

/// The `test` profile: batches of 100, chunks of 1000, pressure limit 500,
/// one minute of run time, three checker jobs per push.
pub fn test_profile() -> RawProfile {
    RawProfile {
        max_wiki_size: Some(10_000),
        update_jobs_max_pressure: Some(500),
        checker_batch_size: Some(100),
        jobs_chunk_size: Some(1000),
        checker_job_max_time: Some(60),
        reindex_after_loops: None,
        min_loop_duration: Some(3600),
        max_checker_jobs: Some(3),
    }
}

pub fn test_profiles() -> ProfileRepository {
    let mut profiles = ProfileRepository::empty();
    profiles.insert("test", test_profile());
    profiles
}

/// Pressure gauge replaying fixed readings, repeating the last one.
pub struct ScriptedPressure {
    readings: Mutex<VecDeque<u64>>,
    last: Mutex<u64>,
    calls: AtomicUsize,
}

impl ScriptedPressure {
    pub fn new(readings: &[u64]) -> Arc<Self> {
        Arc::new(Self {
            readings: Mutex::new(readings.iter().copied().collect()),
            last: Mutex::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PressureGauge for ScriptedPressure {
    fn pressure(&self) -> Result<u64, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.readings.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }
}
