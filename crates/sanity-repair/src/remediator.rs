//! Remediators: what to do with the divergences a checker finds.

use std::collections::BTreeSet;
use std::sync::Arc;

use sanity_cluster::ClusterAssignment;
use sanity_queue::JobQueue;
use sanity_types::{DeletePagesParams, DocId, Job, LinksUpdateParams, PageRecord, Title};
use tracing::{debug, info};

use crate::action::{RepairAction, apply};
use crate::error::RepairError;

/// Receives one call per divergence found.
pub trait Remediator: Send {
    /// A redirect is indexed as if it were a page.
    fn redirect_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError>;

    /// A live page is missing from the index.
    fn page_not_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError>;

    /// The index holds a document for a page that is gone.
    fn ghost_page_in_index(&mut self, doc_id: &DocId, title: &Title) -> Result<(), RepairError>;

    /// A copy of the document sits in the wrong index.
    fn page_in_wrong_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        wrong_index_type: Option<&str>,
    ) -> Result<(), RepairError>;

    /// A copy of the document was built from an older revision.
    fn old_version_in_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        index_type: Option<&str>,
    ) -> Result<(), RepairError>;

    /// The document is due for a periodic re-index.
    fn old_document(&mut self, page: &PageRecord) -> Result<(), RepairError>;
}

/// Remediators able to target every writable cluster at once.
pub trait AllClustersRemediator: Remediator {
    /// Whether a batch affecting exactly `clusters` can go out as one job.
    fn can_send_optimized_job(&self, clusters: &BTreeSet<String>) -> bool;
}

// ---------------------------------------------------------------------------
// Queueing
// ---------------------------------------------------------------------------

/// Turns every action into corrective jobs on the durable queue.
///
/// `cluster: None` produces jobs for all writable clusters.
pub struct QueueingRemediator {
    queue: Arc<JobQueue>,
    cluster: Option<String>,
}

impl QueueingRemediator {
    /// Remediator pushing jobs targeted at `cluster`.
    pub fn new(queue: Arc<JobQueue>, cluster: Option<String>) -> Self {
        Self { queue, cluster }
    }

    /// Target cluster of produced jobs.
    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    fn push_links_update(&self, page: &PageRecord) -> Result<(), RepairError> {
        let job = Job::LinksUpdate(LinksUpdateParams {
            title: page.title().unwrap_or_else(Title::bad_title),
            page_id: page.page_id,
            added_links: Vec::new(),
            removed_links: Vec::new(),
            prioritized: false,
            cluster: self.cluster.clone(),
        });
        let id = self.queue.push(job, None)?;
        debug!(id, page_id = page.page_id, cluster = ?self.cluster, "queued links update");
        Ok(())
    }

    fn push_delete_pages(
        &self,
        doc_id: &DocId,
        title: Title,
        index_suffix: Option<&str>,
    ) -> Result<(), RepairError> {
        let job = Job::DeletePages(DeletePagesParams {
            title,
            doc_id: doc_id.clone(),
            index_suffix: index_suffix.map(str::to_string),
            cluster: self.cluster.clone(),
        });
        let id = self.queue.push(job, None)?;
        debug!(id, %doc_id, index_suffix, cluster = ?self.cluster, "queued delete");
        Ok(())
    }
}

impl Remediator for QueueingRemediator {
    fn redirect_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.push_links_update(page)
    }

    fn page_not_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.push_links_update(page)
    }

    fn ghost_page_in_index(&mut self, doc_id: &DocId, title: &Title) -> Result<(), RepairError> {
        self.push_delete_pages(doc_id, title.clone(), None)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        wrong_index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        let title = page.title().unwrap_or_else(Title::bad_title);
        self.push_delete_pages(doc_id, title, wrong_index_type)?;
        self.push_links_update(page)
    }

    fn old_version_in_index(
        &mut self,
        _doc_id: &DocId,
        page: &PageRecord,
        _index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        self.push_links_update(page)
    }

    fn old_document(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.push_links_update(page)
    }
}

/// A [`QueueingRemediator`] targeting all writable clusters.
pub struct AllClustersQueueingRemediator {
    inner: QueueingRemediator,
    assignment: Arc<ClusterAssignment>,
}

impl AllClustersQueueingRemediator {
    /// Remediator pushing untargeted jobs.
    pub fn new(queue: Arc<JobQueue>, assignment: Arc<ClusterAssignment>) -> Self {
        Self {
            inner: QueueingRemediator::new(queue, None),
            assignment,
        }
    }
}

impl AllClustersRemediator for AllClustersQueueingRemediator {
    fn can_send_optimized_job(&self, clusters: &BTreeSet<String>) -> bool {
        *clusters == self.assignment.writable_clusters()
    }
}

impl Remediator for AllClustersQueueingRemediator {
    fn redirect_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.inner.redirect_in_index(page)
    }

    fn page_not_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.inner.page_not_in_index(page)
    }

    fn ghost_page_in_index(&mut self, doc_id: &DocId, title: &Title) -> Result<(), RepairError> {
        self.inner.ghost_page_in_index(doc_id, title)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        wrong_index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        self.inner.page_in_wrong_index(doc_id, page, wrong_index_type)
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        self.inner.old_version_in_index(doc_id, page, index_type)
    }

    fn old_document(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.inner.old_document(page)
    }
}

// ---------------------------------------------------------------------------
// Buffered
// ---------------------------------------------------------------------------

/// Records actions in order so they can be compared and replayed later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedRemediator {
    actions: Vec<RepairAction>,
}

impl BufferedRemediator {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions recorded so far.
    pub fn actions(&self) -> &[RepairAction] {
        &self.actions
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Send every recorded action, in order, to `remediator`.
    pub fn replay<R: Remediator + ?Sized>(&self, remediator: &mut R) -> Result<(), RepairError> {
        for action in &self.actions {
            apply(action, remediator)?;
        }
        Ok(())
    }

    /// Forget all recorded actions.
    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

impl Remediator for BufferedRemediator {
    fn redirect_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.actions.push(RepairAction::RedirectInIndex(page.clone()));
        Ok(())
    }

    fn page_not_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.actions.push(RepairAction::PageNotInIndex(page.clone()));
        Ok(())
    }

    fn ghost_page_in_index(&mut self, doc_id: &DocId, title: &Title) -> Result<(), RepairError> {
        self.actions.push(RepairAction::GhostPageInIndex {
            doc_id: doc_id.clone(),
            title: title.clone(),
        });
        Ok(())
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        wrong_index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        self.actions.push(RepairAction::PageInWrongIndex {
            doc_id: doc_id.clone(),
            page: page.clone(),
            wrong_index_type: wrong_index_type.map(str::to_string),
        });
        Ok(())
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        self.actions.push(RepairAction::OldVersionInIndex {
            doc_id: doc_id.clone(),
            page: page.clone(),
            index_type: index_type.map(str::to_string),
        });
        Ok(())
    }

    fn old_document(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        self.actions.push(RepairAction::OldDocument(page.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Noop / Printing
// ---------------------------------------------------------------------------

/// Ignores every action. Useful for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRemediator;

impl Remediator for NoopRemediator {
    fn redirect_in_index(&mut self, _page: &PageRecord) -> Result<(), RepairError> {
        Ok(())
    }

    fn page_not_in_index(&mut self, _page: &PageRecord) -> Result<(), RepairError> {
        Ok(())
    }

    fn ghost_page_in_index(&mut self, _doc_id: &DocId, _title: &Title) -> Result<(), RepairError> {
        Ok(())
    }

    fn page_in_wrong_index(
        &mut self,
        _doc_id: &DocId,
        _page: &PageRecord,
        _wrong_index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        Ok(())
    }

    fn old_version_in_index(
        &mut self,
        _doc_id: &DocId,
        _page: &PageRecord,
        _index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        Ok(())
    }

    fn old_document(&mut self, _page: &PageRecord) -> Result<(), RepairError> {
        Ok(())
    }
}

/// Logs every action, then forwards it to the wrapped remediator.
pub struct PrintingRemediator {
    next: Box<dyn Remediator>,
}

impl PrintingRemediator {
    /// Log and forward to `next`.
    pub fn new(next: Box<dyn Remediator>) -> Self {
        Self { next }
    }

    /// Log only.
    pub fn standalone() -> Self {
        Self::new(Box::new(NoopRemediator))
    }
}

impl Remediator for PrintingRemediator {
    fn redirect_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        info!(page_id = page.page_id, title = %page.title, "redirect in index");
        self.next.redirect_in_index(page)
    }

    fn page_not_in_index(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        info!(page_id = page.page_id, title = %page.title, "page not in index");
        self.next.page_not_in_index(page)
    }

    fn ghost_page_in_index(&mut self, doc_id: &DocId, title: &Title) -> Result<(), RepairError> {
        info!(%doc_id, %title, "deleted page in index");
        self.next.ghost_page_in_index(doc_id, title)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        wrong_index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        info!(
            %doc_id,
            page_id = page.page_id,
            title = %page.title,
            wrong_index_type,
            "page in wrong index"
        );
        self.next.page_in_wrong_index(doc_id, page, wrong_index_type)
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &DocId,
        page: &PageRecord,
        index_type: Option<&str>,
    ) -> Result<(), RepairError> {
        info!(
            %doc_id,
            page_id = page.page_id,
            title = %page.title,
            index_type,
            "old version in index"
        );
        self.next.old_version_in_index(doc_id, page, index_type)
    }

    fn old_document(&mut self, page: &PageRecord) -> Result<(), RepairError> {
        info!(page_id = page.page_id, title = %page.title, "old document");
        self.next.old_document(page)
    }
}
