//! Shared test harness for sanity integration tests.
//!
//! Provides [`Pipeline`]: a page store, a durable queue, one in-memory
//! index per cluster and a worker, all on a manual clock, so tests can run
//! the whole check → correct → write chain and inspect the indices after.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sanity_cluster::{ClusterAssignment, ClusterConfig};
use sanity_jobs::{
    CheckerReport, Clock, JobContext, JobOutcome, ManualClock, ProfileRepository, RawProfile, Worker,
    WorkerReport,
};
use sanity_queue::JobQueue;
use sanity_store::{IndexClient, MemoryIndex, MemoryPageStore};
use sanity_types::{
    CheckerJobParams, DocId, IndexConfig, IndexDocument, Job, PageId, PageRecord, Timestamp,
    queues,
};

/// Start of the manual clock.
pub const START: Timestamp = 1_700_000_000;

/// Name of the profile registered by the harness.
pub const PROFILE: &str = "it";

/// Every queue the worker drains, checkers first.
pub const ALL_QUEUES: [&str; 6] = [
    queues::CHECKER,
    queues::LINKS_UPDATE_PRIORITIZED,
    queues::LINKS_UPDATE,
    queues::DELETE_PAGES,
    queues::OTHER_INDEX,
    queues::ELASTICA_WRITE,
];

/// Clock jump between two drain rounds; longer than any backoff delay.
const ROUND_ADVANCE: u64 = 2048;

/// Generation of every live index in [`MemoryIndex`].
const LIVE_GENERATION: u32 = 1;

/// Drain rounds before [`Pipeline::settle`] gives up.
const MAX_ROUNDS: usize = 64;

// =========================================================================
// Profiles
// =========================================================================

/// A generous profile: batches of 50, chunks of 10k ids, no pressure limit
/// in practice, no minimum loop duration.
pub fn it_profile() -> RawProfile {
    RawProfile {
        max_wiki_size: Some(1_000_000),
        update_jobs_max_pressure: Some(1_000_000),
        checker_batch_size: Some(50),
        jobs_chunk_size: Some(10_000),
        checker_job_max_time: Some(600),
        reindex_after_loops: None,
        min_loop_duration: Some(0),
        max_checker_jobs: Some(1_000),
    }
}

pub fn it_profiles(profile: RawProfile) -> ProfileRepository {
    let mut profiles = ProfileRepository::empty();
    profiles.insert(PROFILE, profile);
    profiles
}

// =========================================================================
// Pipeline
// =========================================================================

/// A complete pipeline over in-memory stores.
pub struct Pipeline {
    pub queue: Arc<JobQueue>,
    pub pages: Arc<MemoryPageStore>,
    pub clusters: Arc<ClusterAssignment>,
    pub indices: BTreeMap<String, Arc<MemoryIndex>>,
    pub clock: Arc<ManualClock>,
    pub config: IndexConfig,
    worker: Worker,
}

impl Pipeline {
    /// Writable clusters backed directly by [`MemoryIndex`].
    pub fn new(cluster_names: &[&str]) -> Self {
        Self::build(cluster_names, it_profile(), |_, index| index)
    }

    /// Like [`new`](Self::new) with a custom profile.
    pub fn with_profile(cluster_names: &[&str], profile: RawProfile) -> Self {
        Self::build(cluster_names, profile, |_, index| index)
    }

    /// Clusters whose [`MemoryIndex`] is reached through `wrap`.
    pub fn build(
        cluster_names: &[&str],
        profile: RawProfile,
        wrap: impl Fn(&str, Arc<dyn IndexClient>) -> Arc<dyn IndexClient>,
    ) -> Self {
        let config = IndexConfig::default();
        let clusters = Arc::new(ClusterAssignment::new(Duration::from_secs(5)));
        let mut indices = BTreeMap::new();
        for &name in cluster_names {
            let index = Arc::new(MemoryIndex::new(config.clone()));
            let client: Arc<dyn IndexClient> = index.clone();
            clusters.add_cluster(
                ClusterConfig {
                    name: name.to_string(),
                    writable: true,
                    private: false,
                },
                wrap(name, client),
            );
            indices.insert(name.to_string(), index);
        }

        let queue = Arc::new(JobQueue::open_temporary().unwrap());
        let pages = Arc::new(MemoryPageStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let ctx = JobContext::new(queue.clone(), pages.clone(), clusters.clone())
            .index_config(config.clone())
            .profiles(it_profiles(profile))
            .clock(clock.clone());

        Self {
            queue,
            pages,
            clusters,
            indices,
            clock,
            config,
            worker: Worker::new(Arc::new(ctx)),
        }
    }

    pub fn index(&self, name: &str) -> &Arc<MemoryIndex> {
        &self.indices[name]
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Insert content pages `ids`, page `id` at revision `id * 10`.
    pub fn add_pages(&self, ids: impl IntoIterator<Item = PageId>) {
        for id in ids {
            self.pages.insert(PageRecord {
                page_id: id,
                namespace: 0,
                title: format!("Page {id}"),
                latest_revision_id: id * 10,
                is_redirect: false,
            });
        }
    }

    /// The document every cluster should hold for `page`.
    pub fn expected_document(&self, page: &PageRecord) -> IndexDocument {
        let suffix = self.config.index_suffix_for_namespace(page.namespace);
        IndexDocument {
            doc_id: self.config.make_id(page.page_id),
            namespace: page.namespace,
            title: page.title().map(|t| t.text).unwrap_or_default(),
            version: Some(page.latest_revision_id),
            index: self.config.index_name(suffix, LIVE_GENERATION),
        }
    }

    /// Put a correct copy of `page` into every cluster.
    pub fn index_correctly(&self, page: &PageRecord) {
        let doc = self.expected_document(page);
        for index in self.indices.values() {
            index.put(doc.clone());
        }
    }

    /// Run one checker job over `[from, to]` right away.
    pub async fn check(&self, from: PageId, to: PageId) -> CheckerReport {
        let job = Job::Checker(CheckerJobParams::new(
            from,
            to,
            PROFILE,
            None,
            0,
            self.clock.now(),
        ));
        match self.worker.execute(&job).await.unwrap() {
            JobOutcome::Checker(report) => report,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    /// Unclaimed jobs across every queue, delayed or not.
    pub fn backlog(&self) -> usize {
        ALL_QUEUES
            .iter()
            .map(|queue| self.queue.len(queue).unwrap())
            .sum()
    }

    /// Run every job until the queues are empty, jumping the clock past
    /// backoff delays between rounds.
    pub async fn settle(&self) -> Vec<WorkerReport> {
        let mut reports = Vec::new();
        for _ in 0..MAX_ROUNDS {
            reports.extend(self.worker.drain(&ALL_QUEUES).await.unwrap());
            if self.backlog() == 0 {
                return reports;
            }
            self.clock.advance(ROUND_ADVANCE);
        }
        panic!("queues did not drain, {} jobs left", self.backlog());
    }

    /// Every copy of a page's document across clusters.
    pub fn copies(&self, page_id: PageId) -> BTreeMap<String, Vec<IndexDocument>> {
        let doc_id: DocId = self.config.make_id(page_id);
        self.indices
            .iter()
            .map(|(name, index)| (name.clone(), index.documents(&doc_id)))
            .collect()
    }

    /// What every cluster should hold for `page_id`, if anything.
    pub fn expected_for(&self, page_id: PageId) -> Option<IndexDocument> {
        self.pages
            .page(page_id)
            .filter(|page| !page.is_redirect && page.title().is_some())
            .map(|page| self.expected_document(&page))
    }

    /// Pages among `ids` whose copies differ from the page store on at
    /// least one cluster.
    pub fn divergent_pages(&self, ids: impl IntoIterator<Item = PageId>) -> Vec<PageId> {
        ids.into_iter()
            .filter(|&id| {
                let expected: Vec<IndexDocument> = self.expected_for(id).into_iter().collect();
                self.copies(id).values().any(|docs| *docs != expected)
            })
            .collect()
    }

    /// Assert that every cluster holds exactly the documents the page
    /// store says it should: one up-to-date copy per indexable page, and
    /// nothing else.
    pub fn assert_converged(&self, ids: impl IntoIterator<Item = PageId>) {
        let mut expected_total = 0;
        for id in ids {
            let expected = self.expected_for(id);
            for (cluster, docs) in self.copies(id) {
                match &expected {
                    Some(doc) => assert_eq!(docs, vec![doc.clone()], "page {id} on {cluster}"),
                    None => assert!(docs.is_empty(), "page {id} on {cluster}: {docs:?}"),
                }
            }
            expected_total += usize::from(expected.is_some());
        }
        for (cluster, index) in &self.indices {
            assert_eq!(index.len(), expected_total, "stray documents on {cluster}");
        }
    }
}
