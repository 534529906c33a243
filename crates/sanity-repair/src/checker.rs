//! Compares pages in the canonical store against one index cluster.
//!
//! For each page id of a batch the [`Checker`] decides on exactly one
//! outcome, first match wins:
//!
//! 1. page missing from the store, indexed: one `GhostPageInIndex` per copy
//! 2. page is a redirect, indexed: `RedirectInIndex`
//! 3. page exists, not indexed: `PageNotInIndex`
//! 4. some copy lives in an index of the wrong type: one `PageInWrongIndex`
//!    per stray copy
//! 5. some copy is older than the latest revision: one `OldVersionInIndex`
//!    per outdated copy
//! 6. otherwise sane, or `OldDocument` if the page is due for a re-index

use std::collections::HashMap;
use std::sync::Arc;

use sanity_store::{IndexClient, PageStore};
use sanity_types::{DocId, IndexConfig, IndexDocument, PageId, PageRecord, Title};
use tracing::{debug, instrument};

use crate::error::CheckError;
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::remediator::Remediator;

/// Predicate selecting pages due for a periodic re-index.
pub type IsOldFn = Arc<dyn Fn(&PageRecord) -> bool + Send + Sync>;

/// Pages loaded from the store, shared by every checker of one job run.
///
/// The owner clears it between batches; the checker only fills it.
#[derive(Debug, Default)]
pub struct PageCache {
    pages: HashMap<PageId, PageRecord>,
}

impl PageCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached page, if any.
    pub fn get(&self, id: PageId) -> Option<&PageRecord> {
        self.pages.get(&id)
    }

    /// Whether `id` has been loaded.
    pub fn contains(&self, id: PageId) -> bool {
        self.pages.contains_key(&id)
    }

    /// Cache a page.
    pub fn insert(&mut self, page: PageRecord) {
        self.pages.insert(page.page_id, page);
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Drop every cached page.
    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

/// Checks batches of page ids against one cluster.
pub struct Checker {
    cluster: String,
    index: Arc<dyn IndexClient>,
    pages: Arc<dyn PageStore>,
    index_config: IndexConfig,
    metrics: Arc<dyn MetricsSink>,
    is_old: Option<IsOldFn>,
    log_sane: bool,
}

impl Checker {
    /// Checker for `cluster`, reading pages from `pages`.
    pub fn new(
        cluster: impl Into<String>,
        index: Arc<dyn IndexClient>,
        pages: Arc<dyn PageStore>,
        index_config: IndexConfig,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            index,
            pages,
            index_config,
            metrics: Arc::new(TracingMetrics),
            is_old: None,
            log_sane: false,
        }
    }

    /// Report counters to `metrics`.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Emit `OldDocument` for otherwise sane pages matching `is_old`.
    pub fn is_old(mut self, is_old: IsOldFn) -> Self {
        self.is_old = Some(is_old);
        self
    }

    /// Log every page found sane, with the reason.
    pub fn log_sane(mut self, log_sane: bool) -> Self {
        self.log_sane = log_sane;
        self
    }

    /// Cluster this checker reads from.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Check `page_ids`, sending every divergence to `remediator`.
    ///
    /// Returns the number of pages that needed fixing. A failed index read
    /// returns [`CheckError::Fetch`] before anything is emitted.
    #[instrument(skip_all, fields(cluster = %self.cluster, batch = page_ids.len()))]
    pub async fn check(
        &self,
        page_ids: &[PageId],
        cache: &mut PageCache,
        remediator: &mut dyn Remediator,
    ) -> Result<usize, CheckError> {
        let doc_ids: Vec<DocId> = page_ids
            .iter()
            .map(|&id| self.index_config.make_id(id))
            .collect();

        self.load_pages(page_ids, cache).await?;
        let from_index = self.load_from_index(&doc_ids).await?;

        let mut fixed = 0u64;
        let mut old = 0u64;
        for (&page_id, doc_id) in page_ids.iter().zip(&doc_ids) {
            let hits = from_index.get(doc_id).map(Vec::as_slice).unwrap_or(&[]);
            let updated = match cache.get(page_id) {
                Some(page) => {
                    let updated = self.check_existing_page(doc_id, page, hits, remediator)?;
                    if !updated && self.is_old.as_ref().is_some_and(|is_old| is_old(page)) {
                        remediator.old_document(page)?;
                        old += 1;
                    }
                    updated
                }
                None => self.check_inexistent_page(doc_id, page_id, hits, remediator)?,
            };
            if updated {
                fixed += 1;
            }
        }

        let cluster = &self.cluster;
        self.metrics
            .update_count(&format!("sanitization.{cluster}.fixed"), fixed);
        self.metrics.update_count(
            &format!("sanitization.{cluster}.checked"),
            page_ids.len() as u64,
        );
        self.metrics
            .update_count(&format!("sanitization.{cluster}.old"), old);
        debug!(fixed, old, "checked batch");
        Ok(fixed as usize)
    }

    /// Load the pages not yet cached. Pages whose stored title is invalid
    /// are left out and therefore treated as missing.
    async fn load_pages(
        &self,
        page_ids: &[PageId],
        cache: &mut PageCache,
    ) -> Result<(), CheckError> {
        let missing: Vec<PageId> = page_ids
            .iter()
            .copied()
            .filter(|&id| !cache.contains(id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for page in self.pages.get_pages(&missing).await? {
            if page.title().is_none() {
                debug!(
                    page_id = page.page_id,
                    title = %page.title,
                    "skipping page with invalid title"
                );
                continue;
            }
            cache.insert(page);
        }
        Ok(())
    }

    async fn load_from_index(
        &self,
        doc_ids: &[DocId],
    ) -> Result<HashMap<DocId, Vec<IndexDocument>>, CheckError> {
        let docs = self
            .index
            .get(doc_ids)
            .await
            .map_err(|source| CheckError::Fetch {
                cluster: self.cluster.clone(),
                source,
            })?;
        let mut by_id: HashMap<DocId, Vec<IndexDocument>> = HashMap::new();
        for doc in docs {
            by_id.entry(doc.doc_id.clone()).or_default().push(doc);
        }
        Ok(by_id)
    }

    fn check_existing_page(
        &self,
        doc_id: &DocId,
        page: &PageRecord,
        hits: &[IndexDocument],
        remediator: &mut dyn Remediator,
    ) -> Result<bool, CheckError> {
        let in_index = !hits.is_empty();
        if page.is_redirect {
            if in_index {
                remediator.redirect_in_index(page)?;
                return Ok(true);
            }
            self.sane(page.page_id, "Redirect not in index");
            return Ok(false);
        }
        if !in_index {
            remediator.page_not_in_index(page)?;
            return Ok(true);
        }

        if self.check_index_mismatch(doc_id, page, hits, remediator)?
            || self.check_indexed_version(doc_id, page, hits, remediator)?
        {
            return Ok(true);
        }
        self.sane(page.page_id, "Page in index with latest version");
        Ok(false)
    }

    fn check_inexistent_page(
        &self,
        doc_id: &DocId,
        page_id: PageId,
        hits: &[IndexDocument],
        remediator: &mut dyn Remediator,
    ) -> Result<bool, CheckError> {
        if hits.is_empty() {
            self.sane(page_id, "No ghost");
            return Ok(false);
        }
        for hit in hits {
            let title =
                Title::new_safe(hit.namespace, &hit.title).unwrap_or_else(Title::bad_title);
            remediator.ghost_page_in_index(doc_id, &title)?;
        }
        Ok(true)
    }

    fn check_index_mismatch(
        &self,
        doc_id: &DocId,
        page: &PageRecord,
        hits: &[IndexDocument],
        remediator: &mut dyn Remediator,
    ) -> Result<bool, CheckError> {
        let expected = self.index_config.index_suffix_for_namespace(page.namespace);
        let mut found = false;
        for hit in hits {
            let suffix = self.index_config.extract_index_suffix(&hit.index);
            if suffix.as_deref() != Some(expected) {
                remediator.page_in_wrong_index(doc_id, page, suffix.as_deref())?;
                found = true;
            }
        }
        Ok(found)
    }

    fn check_indexed_version(
        &self,
        doc_id: &DocId,
        page: &PageRecord,
        hits: &[IndexDocument],
        remediator: &mut dyn Remediator,
    ) -> Result<bool, CheckError> {
        let mut found = false;
        for hit in hits {
            // A copy without a version counts as older than any revision.
            let outdated = hit
                .version
                .is_none_or(|version| version < page.latest_revision_id);
            if outdated {
                let suffix = self.index_config.extract_index_suffix(&hit.index);
                remediator.old_version_in_index(doc_id, page, suffix.as_deref())?;
                found = true;
            }
        }
        Ok(found)
    }

    fn sane(&self, page_id: PageId, reason: &str) {
        if self.log_sane {
            debug!(page_id, reason, "sane");
        }
    }
}
