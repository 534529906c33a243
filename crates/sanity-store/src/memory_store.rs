//! In-memory page store and index cluster.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sanity_types::{DocId, IndexConfig, IndexDocument, PageId, PageRecord, WriteOperation};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{IndexClient, PageStore, WriteStatus};

/// In-memory page store backed by a `RwLock<BTreeMap>`.
///
/// Counts how many page ids were requested so tests can assert that a
/// shared page cache avoids redundant reads. Reads can be made to fail.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: RwLock<BTreeMap<PageId, PageRecord>>,
    ids_read: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MemoryPageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a page.
    pub fn insert(&self, page: PageRecord) {
        let mut pages = self.pages.write().expect("lock poisoned");
        pages.insert(page.page_id, page);
    }

    /// Delete a page.
    pub fn delete(&self, id: PageId) -> Option<PageRecord> {
        self.pages.write().expect("lock poisoned").remove(&id)
    }

    /// Make every [`PageStore::get_pages`] call fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Look up one page without counting the read.
    pub fn page(&self, id: PageId) -> Option<PageRecord> {
        self.pages.read().expect("lock poisoned").get(&id).cloned()
    }

    /// Total number of page ids requested through [`PageStore::get_pages`].
    pub fn ids_read(&self) -> usize {
        self.ids_read.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl PageStore for MemoryPageStore {
    async fn get_pages(&self, ids: &[PageId]) -> Result<Vec<PageRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("page store unavailable".to_string()));
        }
        self.ids_read.fetch_add(ids.len(), Ordering::Relaxed);
        let pages = self.pages.read().expect("lock poisoned");
        Ok(ids.iter().filter_map(|id| pages.get(id).cloned()).collect())
    }

    async fn page_id_bounds(&self) -> Result<Option<(PageId, PageId)>, StoreError> {
        let pages = self.pages.read().expect("lock poisoned");
        let min = pages.keys().next().copied();
        let max = pages.keys().next_back().copied();
        Ok(min.zip(max))
    }
}

/// In-memory index cluster.
///
/// Documents are keyed by doc id and then by full index name, so a single
/// page can sit in several indices at once (the "wrong index" case).
/// Reads and writes can be made to fail, and the cluster can be frozen.
pub struct MemoryIndex {
    config: IndexConfig,
    generation: u32,
    docs: RwLock<BTreeMap<DocId, BTreeMap<String, IndexDocument>>>,
    applied: RwLock<Vec<WriteOperation>>,
    frozen: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    get_calls: AtomicUsize,
}

impl MemoryIndex {
    /// Create an empty cluster using `config` for index naming.
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            generation: 1,
            docs: RwLock::new(BTreeMap::new()),
            applied: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            get_calls: AtomicUsize::new(0),
        }
    }

    /// Full name of the live index for `suffix`.
    pub fn index_name(&self, suffix: &str) -> String {
        self.config.index_name(suffix, self.generation)
    }

    /// Store a document copy directly, bypassing the write path.
    pub fn put(&self, doc: IndexDocument) {
        let mut docs = self.docs.write().expect("lock poisoned");
        docs.entry(doc.doc_id.clone())
            .or_default()
            .insert(doc.index.clone(), doc);
    }

    /// Every copy of a document, ordered by index name.
    pub fn documents(&self, doc_id: &DocId) -> Vec<IndexDocument> {
        let docs = self.docs.read().expect("lock poisoned");
        docs.get(doc_id)
            .map(|copies| copies.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of document copies across all indices.
    pub fn len(&self) -> usize {
        let docs = self.docs.read().expect("lock poisoned");
        docs.values().map(BTreeMap::len).sum()
    }

    /// Whether the cluster holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse writes with [`WriteStatus::Frozen`] until [`thaw`](Self::thaw).
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Relaxed);
    }

    /// Accept writes again.
    pub fn thaw(&self) {
        self.frozen.store(false, Ordering::Relaxed);
    }

    /// Make every `get` fail with a transport error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make every write answer [`WriteStatus::Failed`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of `get` calls served or failed so far.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }

    /// Writes applied so far, in order.
    pub fn applied_writes(&self) -> Vec<WriteOperation> {
        self.applied.read().expect("lock poisoned").clone()
    }

    fn apply(&self, operation: &WriteOperation) {
        let mut docs = self.docs.write().expect("lock poisoned");
        match operation {
            WriteOperation::SendData {
                index_suffix,
                documents,
            } => {
                let index = self.index_name(index_suffix);
                for doc in documents {
                    let mut doc = doc.clone();
                    doc.index = index.clone();
                    docs.entry(doc.doc_id.clone())
                        .or_default()
                        .insert(index.clone(), doc);
                }
            }
            WriteOperation::SendDeletes {
                doc_ids,
                index_suffix,
            } => {
                for doc_id in doc_ids {
                    let Some(copies) = docs.get_mut(doc_id) else {
                        continue;
                    };
                    match index_suffix {
                        Some(suffix) => copies.retain(|index, _| {
                            self.config.extract_index_suffix(index).as_deref()
                                != Some(suffix.as_str())
                        }),
                        None => copies.clear(),
                    }
                    if copies.is_empty() {
                        docs.remove(doc_id);
                    }
                }
            }
            WriteOperation::SendOtherIndexUpdates { .. } => {}
        }
    }
}

#[async_trait::async_trait]
impl IndexClient for MemoryIndex {
    async fn get(&self, doc_ids: &[DocId]) -> Result<Vec<IndexDocument>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::Transport("cluster unreachable".to_string()));
        }
        let docs = self.docs.read().expect("lock poisoned");
        Ok(doc_ids
            .iter()
            .filter_map(|id| docs.get(id))
            .flat_map(|copies| copies.values().cloned())
            .collect())
    }

    async fn write(&self, operation: &WriteOperation) -> Result<WriteStatus, StoreError> {
        if self.frozen.load(Ordering::Relaxed) {
            return Ok(WriteStatus::Frozen);
        }
        if self.fail_writes.load(Ordering::Relaxed) {
            return Ok(WriteStatus::Failed("rejected by cluster".to_string()));
        }
        self.apply(operation);
        self.applied
            .write()
            .expect("lock poisoned")
            .push(operation.clone());
        debug!(method = operation.method(), "applied write");
        Ok(WriteStatus::Ok)
    }
}
