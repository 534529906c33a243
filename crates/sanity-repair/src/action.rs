//! Typed repair actions.

use sanity_types::{DocId, PageRecord, Title};

use crate::error::RepairError;
use crate::remediator::Remediator;

/// One divergence found by the checker, carrying what is needed to fix it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// A redirect page has a document in the index.
    RedirectInIndex(PageRecord),
    /// A live page has no document in the index.
    PageNotInIndex(PageRecord),
    /// The index holds a document for a page that no longer exists.
    GhostPageInIndex {
        /// Document to delete.
        doc_id: DocId,
        /// Title taken from the indexed copy.
        title: Title,
    },
    /// A copy of the document lives in an index its namespace does not map to.
    PageInWrongIndex {
        /// Offending document.
        doc_id: DocId,
        /// Page the document belongs to.
        page: PageRecord,
        /// Suffix of the index holding the stray copy, `None` if unrecognised.
        wrong_index_type: Option<String>,
    },
    /// A copy of the document was built from an older revision.
    OldVersionInIndex {
        /// Outdated document.
        doc_id: DocId,
        /// Page the document belongs to.
        page: PageRecord,
        /// Suffix of the index holding the outdated copy.
        index_type: Option<String>,
    },
    /// The document is current but due for a periodic re-index.
    OldDocument(PageRecord),
}

impl RepairAction {
    /// Stable action name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RedirectInIndex(_) => "redirectInIndex",
            Self::PageNotInIndex(_) => "pageNotInIndex",
            Self::GhostPageInIndex { .. } => "ghostPageInIndex",
            Self::PageInWrongIndex { .. } => "pageInWrongIndex",
            Self::OldVersionInIndex { .. } => "oldVersionInIndex",
            Self::OldDocument(_) => "oldDocument",
        }
    }
}

/// Dispatch `action` to the matching method of `remediator`.
pub fn apply<R: Remediator + ?Sized>(
    action: &RepairAction,
    remediator: &mut R,
) -> Result<(), RepairError> {
    match action {
        RepairAction::RedirectInIndex(page) => remediator.redirect_in_index(page),
        RepairAction::PageNotInIndex(page) => remediator.page_not_in_index(page),
        RepairAction::GhostPageInIndex { doc_id, title } => {
            remediator.ghost_page_in_index(doc_id, title)
        }
        RepairAction::PageInWrongIndex {
            doc_id,
            page,
            wrong_index_type,
        } => remediator.page_in_wrong_index(doc_id, page, wrong_index_type.as_deref()),
        RepairAction::OldVersionInIndex {
            doc_id,
            page,
            index_type,
        } => remediator.old_version_in_index(doc_id, page, index_type.as_deref()),
        RepairAction::OldDocument(page) => remediator.old_document(page),
    }
}
