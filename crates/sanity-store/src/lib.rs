//! Page-store and index-cluster interfaces.
//!
//! This crate defines the two external collaborators of the pipeline:
//!
//! - [`PageStore`]: the canonical page store (read-only).
//! - [`IndexClient`]: one connection to one search-index cluster.
//!
//! along with backends used in tests and demos:
//!
//! - [`MemoryPageStore`] / [`MemoryIndex`]: in-memory state behind `RwLock`s.
//! - [`FlakyIndex`]: wraps any client and injects latency, failures and
//!   frozen responses from a seeded RNG.

mod error;
mod flaky_index;
mod memory_store;
mod traits;

pub use error::StoreError;
pub use flaky_index::FlakyIndex;
pub use memory_store::{MemoryIndex, MemoryPageStore};
pub use traits::{IndexClient, PageStore, WriteStatus};
