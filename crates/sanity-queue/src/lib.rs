//! Durable job queue wrapping Fjall.
//!
//! [`JobQueue`] keeps every pending job in Fjall keyspaces so work survives
//! restarts:
//!
//! - `jobs`: job id → serialized [`QueuedJob`]
//! - `ready`: queue name ++ release timestamp ++ job id, ordered so the
//!   earliest releasable job of a queue is the first key under its prefix
//! - `claimed`: job id → queue name, for jobs handed to a worker
//! - `dedup`: dedup key → job id, for unclaimed idempotent jobs only
//! - `loops`: loop name → serialized [`LoopState`](sanity_types::LoopState)
//! - `meta`: id counter

mod error;
mod store;

pub use error::QueueError;
pub use store::{JobId, JobQueue, QueueStats, QueuedJob};
