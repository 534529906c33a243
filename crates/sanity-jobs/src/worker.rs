//! Claims jobs from the queue and runs them.

use std::sync::Arc;

use sanity_queue::JobId;
use sanity_types::Job;
use tracing::{debug, error, warn};

use crate::checker_job::{CheckerJob, CheckerReport};
use crate::context::JobContext;
use crate::corrective::{DeletePages, LinksUpdate};
use crate::elastica_write::{ElasticaWrite, WriteOutcome};
use crate::error::JobError;

/// A failing job is given up after this many attempts.
pub const WORKER_MAX_ATTEMPTS: u32 = 3;

/// Result of a job that ran without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A checker job finished.
    Checker(CheckerReport),
    /// A write finished.
    Write(WriteOutcome),
    /// A corrective job queued this many writes.
    Corrective(usize),
}

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The job ran and was acknowledged.
    Completed(JobOutcome),
    /// The job failed and went back to the queue.
    Retrying {
        /// Failed attempts so far.
        attempts: u32,
        /// Error of this attempt.
        error: String,
    },
    /// The job failed for good and was removed.
    Failed(String),
}

/// One claimed job and its fate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Queue id of the job.
    pub id: JobId,
    /// Job type name.
    pub job_type: &'static str,
    /// What happened.
    pub outcome: WorkOutcome,
}

/// Runs jobs from the queue one at a time.
pub struct Worker {
    ctx: Arc<JobContext>,
}

impl Worker {
    /// Worker using `ctx`.
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    /// The shared context.
    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Run one job, whatever queue it came from.
    pub async fn execute(&self, job: &Job) -> Result<JobOutcome, JobError> {
        let ctx = self.ctx.as_ref();
        match job {
            Job::Checker(params) => CheckerJob::new(params.clone())
                .run(ctx)
                .await
                .map(JobOutcome::Checker),
            Job::ElasticaWrite(params) => ElasticaWrite::new(params.clone())
                .run(ctx)
                .await
                .map(JobOutcome::Write),
            Job::LinksUpdate(params) => LinksUpdate::new(params.clone())
                .run(ctx)
                .await
                .map(JobOutcome::Corrective),
            Job::DeletePages(params) => DeletePages::new(params.clone())
                .run(ctx)
                .await
                .map(JobOutcome::Corrective),
        }
    }

    /// Claim and run the next ready job of `queue`.
    ///
    /// Returns `None` when nothing is ready. A failing job goes back to the
    /// queue with a backoff delay if its type allows generic retries, the
    /// error is [retryable](JobError::is_retryable) and it has failed fewer
    /// than [`WORKER_MAX_ATTEMPTS`] times; otherwise it is removed and
    /// logged at error level.
    pub async fn run_once(&self, queue: &str) -> Result<Option<WorkerReport>, JobError> {
        let now = self.ctx.clock.now();
        let Some(claimed) = self.ctx.queue.claim(queue, now)? else {
            return Ok(None);
        };
        let job_type = claimed.job.type_name();
        debug!(id = claimed.id, job_type, queue, "running job");

        let may_retry =
            claimed.job.allows_retries() && claimed.attempts + 1 < WORKER_MAX_ATTEMPTS;
        let outcome = match self.execute(&claimed.job).await {
            Ok(outcome) => {
                self.ctx.queue.ack(claimed.id)?;
                WorkOutcome::Completed(outcome)
            }
            Err(err) if may_retry && err.is_retryable() => {
                let delay = self.ctx.backoff.delay(job_type, claimed.attempts);
                let attempts = claimed.attempts + 1;
                warn!(
                    id = claimed.id,
                    job_type,
                    attempts,
                    delay,
                    error = %err,
                    "job failed, retrying"
                );
                self.ctx
                    .queue
                    .release(claimed.id, now.saturating_add(delay))?;
                WorkOutcome::Retrying {
                    attempts,
                    error: err.to_string(),
                }
            }
            Err(err) => {
                error!(
                    id = claimed.id,
                    job_type,
                    attempts = claimed.attempts + 1,
                    error = %err,
                    "job failed, giving up"
                );
                self.ctx.queue.delete(claimed.id)?;
                WorkOutcome::Failed(err.to_string())
            }
        };
        Ok(Some(WorkerReport {
            id: claimed.id,
            job_type,
            outcome,
        }))
    }

    /// Run jobs from `queues` in order until none of them has a ready job.
    ///
    /// Returns every report, in execution order.
    pub async fn drain(&self, queues: &[&str]) -> Result<Vec<WorkerReport>, JobError> {
        let mut reports = Vec::new();
        loop {
            let mut progressed = false;
            for queue in queues {
                while let Some(report) = self.run_once(queue).await? {
                    reports.push(report);
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(reports);
            }
        }
    }
}
