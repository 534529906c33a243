//! Job execution for the sanity pipeline.
//!
//! Every unit of work travels through the durable queue as a
//! [`Job`](sanity_types::Job) and is executed here:
//!
//! - [`CheckerJob`]: scans a page-id range against every target cluster
//!   under pressure and time budgets, requeueing what it could not finish.
//! - [`ElasticaWrite`]: one write against exactly one cluster, with
//!   age-bounded retries for frozen clusters and count-bounded retries for
//!   everything else.
//! - [`LinksUpdate`] / [`DeletePages`]: corrective jobs fanning out into
//!   per-cluster writes.
//! - [`SaneitizeLoop`]: seeds checker jobs over the whole page-id space,
//!   loop after loop.
//! - [`Worker`]: claims, dispatches and acknowledges jobs.
//!
//! Shared collaborators are bundled in a [`JobContext`].

mod checker_job;
mod clock;
mod context;
mod corrective;
mod elastica_write;
mod error;
mod pressure;
mod profile;
mod saneitize;
mod worker;

#[cfg(test)]
mod tests;

pub use checker_job::{
    CHECKER_JOB_MAX_RETRIES, CheckerJob, CheckerReport, CheckerState, make_is_old,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::JobContext;
pub use corrective::{DeletePages, LinksUpdate};
pub use elastica_write::{
    DEFAULT_DROP_TIMEOUT, DEFAULT_MAX_ERROR_RETRY, ElasticaWrite, WriteConfig, WriteOutcome,
};
pub use error::JobError;
pub use pressure::{PressureGauge, checker_pressure};
pub use profile::{LoopProfile, ProfileError, ProfileRepository, RawProfile, SanitizeProfile};
pub use saneitize::{
    LoopStatus, PushReport, SaneitizeLoop, delete_loop, loop_status, push_jobs,
};
pub use worker::{JobOutcome, WORKER_MAX_ATTEMPTS, WorkOutcome, Worker, WorkerReport};
