//! Job parameters that travel through the durable queue.
//!
//! Every job is an immutable message: retries build a fresh parameter
//! struct with updated counters instead of mutating and resending the
//! in-flight one.

use serde::{Deserialize, Serialize};

use crate::{DocId, IndexDocument, PageId, Timestamp, Title};

/// Queue names.
pub mod queues {
    /// Checker jobs scanning page-id ranges.
    pub const CHECKER: &str = "sanity_checker";
    /// Links updates triggered by user edits.
    pub const LINKS_UPDATE_PRIORITIZED: &str = "links_update_prioritized";
    /// Links updates triggered by background repair.
    pub const LINKS_UPDATE: &str = "links_update";
    /// Single-cluster index writes.
    pub const ELASTICA_WRITE: &str = "elastica_write";
    /// Writes to indices owned by other wikis.
    pub const OTHER_INDEX: &str = "other_index";
    /// Document deletions.
    pub const DELETE_PAGES: &str = "delete_pages";

    /// Downstream write queues summed into the pressure gauge.
    pub const UPDATE_QUEUES: [&str; 5] = [
        LINKS_UPDATE_PRIORITIZED,
        LINKS_UPDATE,
        ELASTICA_WRITE,
        OTHER_INDEX,
        DELETE_PAGES,
    ];
}

/// One write against one index cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOperation {
    /// Index (or re-index) full documents into the index with this suffix.
    SendData {
        /// Target index suffix.
        index_suffix: String,
        /// Documents to write.
        documents: Vec<IndexDocument>,
    },
    /// Delete documents, from one index suffix or from all of them.
    SendDeletes {
        /// Documents to delete.
        doc_ids: Vec<DocId>,
        /// Restrict the delete to one index suffix.
        index_suffix: Option<String>,
    },
    /// Update the per-wiki metadata stored in another wiki's index.
    SendOtherIndexUpdates {
        /// Name of the foreign index.
        index: String,
        /// Titles whose entries must be refreshed.
        titles: Vec<Title>,
    },
}

impl WriteOperation {
    /// Stable method name, used in logs.
    pub fn method(&self) -> &'static str {
        match self {
            Self::SendData { .. } => "sendData",
            Self::SendDeletes { .. } => "sendDeletes",
            Self::SendOtherIndexUpdates { .. } => "sendOtherIndexUpdates",
        }
    }
}

/// Parameters of a checker job scanning `[from_page_id, to_page_id]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerJobParams {
    /// First page id to check (inclusive).
    pub from_page_id: PageId,
    /// Last page id to check (inclusive).
    pub to_page_id: PageId,
    /// Times this range has been requeued.
    pub retry_count: u32,
    /// When the first job for this range was created.
    pub created_at: Timestamp,
    /// Target cluster, `None` for all writable clusters.
    pub cluster: Option<String>,
    /// Sanitization profile name.
    pub profile: String,
    /// How many times the saneitize loop has wrapped around the page-id space.
    pub loop_id: u64,
}

impl CheckerJobParams {
    /// Parameters for a fresh checker job.
    pub fn new(
        from_page_id: PageId,
        to_page_id: PageId,
        profile: impl Into<String>,
        cluster: Option<String>,
        loop_id: u64,
        now: Timestamp,
    ) -> Self {
        Self {
            from_page_id,
            to_page_id,
            retry_count: 0,
            created_at: now,
            cluster,
            profile: profile.into(),
            loop_id,
        }
    }
}

/// Parameters of a single-cluster write job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticaWriteParams {
    /// The write to perform.
    pub operation: WriteOperation,
    /// Target cluster. Must resolve to exactly one connection.
    pub cluster: Option<String>,
    /// When the write was first queued.
    pub created_at: Timestamp,
    /// Times this write has been requeued for any reason.
    pub retry_count: u32,
    /// Times this write has failed with a non-frozen error.
    pub error_count: u32,
}

impl ElasticaWriteParams {
    /// Parameters for a fresh write against `cluster`.
    pub fn new(operation: WriteOperation, cluster: impl Into<String>, now: Timestamp) -> Self {
        Self {
            operation,
            cluster: Some(cluster.into()),
            created_at: now,
            retry_count: 0,
            error_count: 0,
        }
    }
}

/// Re-render a page and send the resulting document to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinksUpdateParams {
    /// Page title.
    pub title: Title,
    /// Page id.
    pub page_id: PageId,
    /// Links added by the triggering edit.
    pub added_links: Vec<Title>,
    /// Links removed by the triggering edit.
    pub removed_links: Vec<Title>,
    /// Route through the prioritized queue.
    pub prioritized: bool,
    /// Target cluster, `None` for all writable clusters.
    pub cluster: Option<String>,
}

/// Remove a document from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePagesParams {
    /// Title of the deleted page, for logging.
    pub title: Title,
    /// Document to delete.
    pub doc_id: DocId,
    /// Restrict the delete to one index suffix.
    pub index_suffix: Option<String>,
    /// Target cluster, `None` for all writable clusters.
    pub cluster: Option<String>,
}

/// Persisted progress of one saneitize loop.
///
/// A loop walks the whole page-id space in chunks; when it passes the
/// largest id it wraps around and `loop_id` increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    /// Name the loop is stored under.
    pub job_name: String,
    /// Cluster the loop was created for, `None` for all writable clusters.
    pub cluster: Option<String>,
    /// Number of completed passes over the page-id space.
    pub loop_id: u64,
    /// Next page id to hand out.
    pub id_offset: PageId,
    /// When the loop state was created.
    pub created: Timestamp,
    /// Last time jobs were pushed.
    pub updated: Timestamp,
    /// When the current pass started.
    pub last_loop: Timestamp,
    /// Ids covered by jobs in the current pass.
    pub ids_sent: u64,
    /// Ids covered by jobs since creation.
    pub ids_sent_total: u64,
    /// Jobs pushed in the current pass.
    pub jobs_sent: u64,
    /// Jobs pushed since creation.
    pub jobs_sent_total: u64,
}

impl LoopState {
    /// A fresh loop starting at `min_id`.
    pub fn new(
        job_name: impl Into<String>,
        cluster: Option<String>,
        min_id: PageId,
        now: Timestamp,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            cluster,
            loop_id: 0,
            id_offset: min_id,
            created: now,
            updated: now,
            last_loop: now,
            ids_sent: 0,
            ids_sent_total: 0,
            jobs_sent: 0,
            jobs_sent_total: 0,
        }
    }
}

/// Every job type the pipeline produces or consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    /// Scan a page-id range for divergence.
    Checker(CheckerJobParams),
    /// Write to exactly one cluster.
    ElasticaWrite(ElasticaWriteParams),
    /// Re-index one page.
    LinksUpdate(LinksUpdateParams),
    /// Delete one document.
    DeletePages(DeletePagesParams),
}

impl Job {
    /// Queue this job is pushed onto.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::Checker(_) => queues::CHECKER,
            Self::ElasticaWrite(_) => queues::ELASTICA_WRITE,
            Self::LinksUpdate(p) if p.prioritized => queues::LINKS_UPDATE_PRIORITIZED,
            Self::LinksUpdate(_) => queues::LINKS_UPDATE,
            Self::DeletePages(_) => queues::DELETE_PAGES,
        }
    }

    /// Short type name, used in logs and backoff configuration.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Checker(_) => "checker_job",
            Self::ElasticaWrite(_) => "elastica_write",
            Self::LinksUpdate(_) => "links_update",
            Self::DeletePages(_) => "delete_pages",
        }
    }

    /// Whether the queue's generic retry path may re-run this job on error.
    ///
    /// Writes manage their own retries; a generic retry on top would
    /// multiply an already high-volume failure path.
    pub fn allows_retries(&self) -> bool {
        !matches!(self, Self::ElasticaWrite(_))
    }

    /// Key identifying duplicates of an idempotent job, if it has one.
    ///
    /// Keys start with the queue name, so a prioritized update never merges
    /// into a slow one.
    pub fn dedup_key(&self) -> Option<String> {
        let cluster = |c: &Option<String>| c.clone().unwrap_or_else(|| "*".to_string());
        match self {
            Self::LinksUpdate(p) if p.added_links.is_empty() && p.removed_links.is_empty() => {
                Some(format!(
                    "{}:{}:{}",
                    self.queue_name(),
                    p.page_id,
                    cluster(&p.cluster)
                ))
            }
            Self::DeletePages(p) => Some(format!(
                "delete_pages:{}:{}:{}",
                p.doc_id,
                p.index_suffix.as_deref().unwrap_or("*"),
                cluster(&p.cluster)
            )),
            _ => None,
        }
    }
}
