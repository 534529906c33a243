//! Shared types and identifiers for the sanity pipeline.
//!
//! This crate defines the value types used across the workspace:
//! identifiers ([`PageId`], [`DocId`]), page-store and index-store records
//! ([`PageRecord`], [`IndexDocument`], [`Title`]), index layout
//! configuration ([`IndexConfig`]) and, in [`jobs`], every job parameter
//! struct that travels through the durable queue.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod jobs;

pub use jobs::{
    CheckerJobParams, DeletePagesParams, ElasticaWriteParams, Job, LinksUpdateParams, LoopState,
    WriteOperation, queues,
};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Numeric identifier of a page in the canonical page store.
pub type PageId = u64;

/// Namespace number of a page (0 = main/article namespace).
pub type NamespaceId = i32;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Identifier of a document in a search index.
///
/// Derived from the page id, optionally prefixed with a wiki id
/// (`"<prefix>|<page_id>"`) when several wikis share one index.
#[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DocId(String);

impl DocId {
    /// Wrap a raw document id string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Return the raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Titles
// ---------------------------------------------------------------------------

/// Characters that can never appear in a page title.
const ILLEGAL_TITLE_CHARS: &[char] = &['#', '<', '>', '[', ']', '|', '{', '}'];

/// Maximum title length in bytes.
const MAX_TITLE_BYTES: usize = 255;

/// Namespace used for the placeholder title of unparseable index hits.
pub const NS_SPECIAL: NamespaceId = -1;

/// A canonicalised page title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Title {
    /// Namespace number.
    pub namespace: NamespaceId,
    /// Canonical text (spaces, first letter upper-cased).
    pub text: String,
}

impl Title {
    /// Canonicalise `text` in `namespace`, returning `None` for invalid titles.
    ///
    /// Underscores become spaces, runs of whitespace collapse, the first
    /// letter is upper-cased. Empty titles, titles over 255 bytes and titles
    /// containing `# < > [ ] | { }` or control characters are rejected.
    pub fn new_safe(namespace: NamespaceId, text: &str) -> Option<Self> {
        let replaced = text.replace('_', " ");
        let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");

        if collapsed.is_empty() || collapsed.len() > MAX_TITLE_BYTES {
            return None;
        }
        if collapsed
            .chars()
            .any(|c| c.is_control() || ILLEGAL_TITLE_CHARS.contains(&c))
        {
            return None;
        }

        let mut chars = collapsed.chars();
        let text = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => return None,
        };

        Some(Self { namespace, text })
    }

    /// Placeholder used when an index hit carries a title that cannot be parsed.
    pub fn bad_title() -> Self {
        Self {
            namespace: NS_SPECIAL,
            text: "Badtitle/InvalidInDBOrElastic".to_string(),
        }
    }

    /// The title in database-key form (spaces as underscores).
    pub fn db_key(&self) -> String {
        self.text.replace(' ', "_")
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            0 => f.write_str(&self.text),
            NS_SPECIAL => write!(f, "Special:{}", self.text),
            ns => write!(f, "{ns}:{}", self.text),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A page as read from the canonical page store. Read-only to this pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Page identifier.
    pub page_id: PageId,
    /// Namespace number.
    pub namespace: NamespaceId,
    /// Stored title text, as found in the store (may be corrupt).
    pub title: String,
    /// Revision id of the latest revision.
    pub latest_revision_id: u64,
    /// Whether the page is a redirect.
    pub is_redirect: bool,
}

impl PageRecord {
    /// Canonical title, or `None` if the stored title is invalid.
    pub fn title(&self) -> Option<Title> {
        Title::new_safe(self.namespace, &self.title)
    }
}

/// A document as stored in one index of one search cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Document identifier.
    pub doc_id: DocId,
    /// Namespace the document was indexed under.
    pub namespace: NamespaceId,
    /// Title the document was indexed under.
    pub title: String,
    /// Revision id the document was built from. `None` when missing.
    pub version: Option<u64>,
    /// Full name of the index holding this copy (`<base>_<suffix>_<generation>`).
    pub index: String,
}

// ---------------------------------------------------------------------------
// Index layout
// ---------------------------------------------------------------------------

/// Index suffix for content namespaces.
pub const CONTENT_INDEX_TYPE: &str = "content";

/// Index suffix for everything else.
pub const GENERAL_INDEX_TYPE: &str = "general";

/// How pages map onto document ids and index suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base name of all indices (e.g. `"enwiki"`).
    pub base_name: String,
    /// Prefix document ids with the wiki id.
    pub id_prefix: Option<String>,
    /// Namespaces whose pages live in the content index.
    pub content_namespaces: BTreeSet<NamespaceId>,
    /// Explicit namespace → suffix assignments, taking precedence.
    pub namespace_mappings: BTreeMap<NamespaceId, String>,
    /// Suffixes of privacy-sensitive indices, hosted on private clusters only.
    pub private_suffixes: BTreeSet<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_name: "wiki".to_string(),
            id_prefix: None,
            content_namespaces: BTreeSet::from([0]),
            namespace_mappings: BTreeMap::new(),
            private_suffixes: BTreeSet::new(),
        }
    }
}

impl IndexConfig {
    /// Build the document id for a page.
    pub fn make_id(&self, page_id: PageId) -> DocId {
        match &self.id_prefix {
            Some(prefix) => DocId(format!("{prefix}|{page_id}")),
            None => DocId(page_id.to_string()),
        }
    }

    /// Index suffix a page in `namespace` is expected to live in.
    pub fn index_suffix_for_namespace(&self, namespace: NamespaceId) -> &str {
        if let Some(suffix) = self.namespace_mappings.get(&namespace) {
            return suffix;
        }
        if self.content_namespaces.contains(&namespace) {
            CONTENT_INDEX_TYPE
        } else {
            GENERAL_INDEX_TYPE
        }
    }

    /// All index suffixes known to this layout.
    pub fn all_index_suffixes(&self) -> BTreeSet<String> {
        let mut suffixes = BTreeSet::from([
            CONTENT_INDEX_TYPE.to_string(),
            GENERAL_INDEX_TYPE.to_string(),
        ]);
        suffixes.extend(self.namespace_mappings.values().cloned());
        suffixes
    }

    /// Whether indices with this suffix may only live on private clusters.
    pub fn is_private_suffix(&self, suffix: &str) -> bool {
        self.private_suffixes.contains(suffix)
    }

    /// Full index name for a suffix and generation.
    pub fn index_name(&self, suffix: &str, generation: u32) -> String {
        format!("{}_{suffix}_{generation}", self.base_name)
    }

    /// Extract the suffix from a full index name of the form
    /// `<anything>_<suffix>_<generation>`.
    ///
    /// Returns `None` when the name does not end with a known suffix
    /// followed by a single `_`-free generation segment.
    pub fn extract_index_suffix(&self, index_name: &str) -> Option<String> {
        let (head, generation) = index_name.rsplit_once('_')?;
        if generation.is_empty() {
            return None;
        }
        self.all_index_suffixes()
            .into_iter()
            .find(|suffix| head.ends_with(&format!("_{suffix}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_canonicalises() {
        let title = Title::new_safe(0, "  main_page   of__wiki ").unwrap();
        assert_eq!(title.text, "Main page of wiki");
        assert_eq!(title.db_key(), "Main_page_of_wiki");
    }

    #[test]
    fn test_title_rejects_illegal() {
        assert!(Title::new_safe(0, "").is_none());
        assert!(Title::new_safe(0, "___").is_none());
        assert!(Title::new_safe(0, "Foo[bar]").is_none());
        assert!(Title::new_safe(0, "Foo\u{0007}").is_none());
        assert!(Title::new_safe(0, &"x".repeat(256)).is_none());
    }

    #[test]
    fn test_title_display() {
        assert_eq!(Title::new_safe(0, "foo").unwrap().to_string(), "Foo");
        assert_eq!(Title::new_safe(4, "foo").unwrap().to_string(), "4:Foo");
        assert_eq!(
            Title::bad_title().to_string(),
            "Special:Badtitle/InvalidInDBOrElastic"
        );
    }

    #[test]
    fn test_make_id() {
        let mut config = IndexConfig::default();
        assert_eq!(config.make_id(42).as_str(), "42");
        config.id_prefix = Some("enwiki".to_string());
        assert_eq!(config.make_id(42).as_str(), "enwiki|42");
    }

    #[test]
    fn test_index_suffix_for_namespace() {
        let mut config = IndexConfig::default();
        config.namespace_mappings.insert(6, "file".to_string());
        assert_eq!(config.index_suffix_for_namespace(0), CONTENT_INDEX_TYPE);
        assert_eq!(config.index_suffix_for_namespace(1), GENERAL_INDEX_TYPE);
        assert_eq!(config.index_suffix_for_namespace(6), "file");
    }

    #[test]
    fn test_extract_index_suffix() {
        let mut config = IndexConfig::default();
        config.namespace_mappings.insert(6, "file".to_string());
        assert_eq!(
            config.extract_index_suffix("enwiki_content_1700000000").as_deref(),
            Some("content")
        );
        assert_eq!(
            config.extract_index_suffix("enwiki_general_2").as_deref(),
            Some("general")
        );
        assert_eq!(
            config.extract_index_suffix("enwiki_file_9").as_deref(),
            Some("file")
        );
        assert_eq!(config.extract_index_suffix("enwiki_titlesuggest_1"), None);
        assert_eq!(config.extract_index_suffix("enwiki_content_"), None);
        assert_eq!(config.extract_index_suffix("content"), None);
    }

    #[test]
    fn test_private_suffixes() {
        let mut config = IndexConfig::default();
        assert!(!config.is_private_suffix("general"));
        config.private_suffixes.insert("general".to_string());
        assert!(config.is_private_suffix("general"));
        assert!(!config.is_private_suffix(CONTENT_INDEX_TYPE));
    }

    #[test]
    fn test_page_record_title() {
        let page = PageRecord {
            page_id: 1,
            namespace: 0,
            title: "Some_page".to_string(),
            latest_revision_id: 10,
            is_redirect: false,
        };
        assert_eq!(page.title().unwrap().text, "Some page");

        let corrupt = PageRecord {
            title: "Bad|title".to_string(),
            ..page
        };
        assert!(corrupt.title().is_none());
    }
}
