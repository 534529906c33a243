//! Core traits for the page store and index clusters.

use sanity_types::{DocId, IndexDocument, PageId, PageRecord, WriteOperation};

use crate::error::StoreError;

/// Outcome of a write that reached the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    /// The write was applied.
    Ok,
    /// The cluster is administratively paused and refused the write.
    Frozen,
    /// The cluster rejected the write.
    Failed(String),
}

/// Read access to the canonical page store.
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait PageStore: Send + Sync {
    /// Load the pages with the given ids. Missing ids are simply absent.
    async fn get_pages(&self, ids: &[PageId]) -> Result<Vec<PageRecord>, StoreError>;

    /// Smallest and largest page id, or `None` for an empty store.
    async fn page_id_bounds(&self) -> Result<Option<(PageId, PageId)>, StoreError>;
}

/// A connection to one search-index cluster.
#[async_trait::async_trait]
pub trait IndexClient: Send + Sync {
    /// Fetch every copy of the given documents, across all indices.
    async fn get(&self, doc_ids: &[DocId]) -> Result<Vec<IndexDocument>, StoreError>;

    /// Perform one write.
    ///
    /// `Err` means the request never got a usable answer (transport
    /// failure); refusals from a reachable cluster are [`WriteStatus`]es.
    async fn write(&self, operation: &WriteOperation) -> Result<WriteStatus, StoreError>;
}
