//! Single-cluster writes.
//!
//! An [`ElasticaWrite`] performs one [`WriteOperation`] against exactly one
//! cluster and manages its own retries, so the worker never retries it:
//!
//! - a frozen cluster is retried while the job is younger than
//!   [`WriteConfig::drop_timeout`]
//! - any other failure is retried while `error_count` is below
//!   [`WriteConfig::max_error_retry`]
//!
//! Dropped writes are logged under the `sanity::change_failed` target.

use std::time::Duration;

use sanity_cluster::JobDelay;
use sanity_store::WriteStatus;
use sanity_types::{ElasticaWriteParams, Job, WriteOperation};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::context::JobContext;
use crate::error::JobError;

/// Default age after which writes to a frozen cluster are dropped (2 days).
pub const DEFAULT_DROP_TIMEOUT: u64 = 2 * 24 * 3600;

/// Default number of failed attempts after which a write is dropped.
pub const DEFAULT_MAX_ERROR_RETRY: u32 = 4;

/// Retry ceilings of single-cluster writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Seconds since creation after which a frozen write is dropped.
    pub drop_timeout: u64,
    /// Failures after which a write is dropped.
    pub max_error_retry: u32,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            drop_timeout: DEFAULT_DROP_TIMEOUT,
            max_error_retry: DEFAULT_MAX_ERROR_RETRY,
        }
    }
}

/// How a write ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The cluster applied the write.
    Written,
    /// The write was pushed again with these parameters.
    Requeued(ElasticaWriteParams),
    /// The write was given up on.
    Dropped,
}

/// One execution of a single-cluster write.
#[derive(Debug, Clone)]
pub struct ElasticaWrite {
    params: ElasticaWriteParams,
}

impl ElasticaWrite {
    /// Job for `params`.
    pub fn new(params: ElasticaWriteParams) -> Self {
        Self { params }
    }

    /// Parameters of this job.
    pub fn params(&self) -> &ElasticaWriteParams {
        &self.params
    }

    /// Perform the write.
    ///
    /// Misconfiguration is returned as an error: a cluster that is not
    /// writable ([`ClusterError::NotWritable`](sanity_cluster::ClusterError))
    /// or a selection that does not resolve to exactly one cluster
    /// ([`JobError::ClusterCount`]).
    #[instrument(
        skip_all,
        fields(
            method = self.params.operation.method(),
            cluster = ?self.params.cluster,
            retry = self.params.retry_count,
            errors = self.params.error_count,
        )
    )]
    pub async fn run(&self, ctx: &JobContext) -> Result<WriteOutcome, JobError> {
        let params = &self.params;
        let connections = ctx
            .clusters
            .decide_clusters(
                params.cluster.as_deref(),
                &ctx.selection_for(&params.operation),
            )?;
        if connections.len() != 1 {
            return Err(JobError::ClusterCount {
                cluster: params.cluster.clone(),
                count: connections.len(),
            });
        }
        let Some((name, connection)) = connections.into_iter().next() else {
            return Err(JobError::ClusterCount {
                cluster: params.cluster.clone(),
                count: 0,
            });
        };

        let result = tokio::time::timeout(
            connection.write_timeout,
            connection.client.write(&params.operation),
        )
        .await;
        let failure = match result {
            Ok(Ok(WriteStatus::Ok)) => {
                debug!(
                    cluster = %name,
                    replica_group = connection.replica_group.as_deref(),
                    "write applied"
                );
                return Ok(WriteOutcome::Written);
            }
            Ok(Ok(WriteStatus::Frozen)) => return self.on_frozen(ctx, &name),
            Ok(Ok(WriteStatus::Failed(reason))) => reason,
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("timed out after {}", humanize(connection.write_timeout)),
        };
        self.on_failure(ctx, &name, &failure)
    }

    fn on_frozen(&self, ctx: &JobContext, cluster: &str) -> Result<WriteOutcome, JobError> {
        let params = &self.params;
        let age = ctx.clock.now().saturating_sub(params.created_at);
        if age < ctx.write.drop_timeout {
            let next = ElasticaWriteParams {
                retry_count: params.retry_count + 1,
                ..params.clone()
            };
            return self.requeue(ctx, next, "cluster frozen");
        }
        error!(
            target: "sanity::change_failed",
            method = params.operation.method(),
            cluster,
            age,
            documents = document_count(&params.operation),
            "dropping delayed write to frozen cluster, needs manual attention"
        );
        Ok(WriteOutcome::Dropped)
    }

    fn on_failure(
        &self,
        ctx: &JobContext,
        cluster: &str,
        reason: &str,
    ) -> Result<WriteOutcome, JobError> {
        let params = &self.params;
        if params.error_count < ctx.write.max_error_retry {
            let next = ElasticaWriteParams {
                retry_count: params.retry_count + 1,
                error_count: params.error_count + 1,
                ..params.clone()
            };
            return self.requeue(ctx, next, reason);
        }
        error!(
            target: "sanity::change_failed",
            method = params.operation.method(),
            cluster,
            errors = params.error_count,
            reason,
            documents = document_count(&params.operation),
            "dropping failed write, needs manual attention"
        );
        Ok(WriteOutcome::Dropped)
    }

    fn requeue(
        &self,
        ctx: &JobContext,
        next: ElasticaWriteParams,
        reason: &str,
    ) -> Result<WriteOutcome, JobError> {
        let job = Job::ElasticaWrite(next.clone());
        let delay = ctx.backoff.delay(job.type_name(), self.params.retry_count);
        let release = JobDelay::after(ctx.clock.now(), delay);
        let id = ctx.queue.push(job, Some(release.release_at))?;
        info!(
            id,
            reason,
            delay,
            retry = next.retry_count,
            errors = next.error_count,
            "requeueing write"
        );
        Ok(WriteOutcome::Requeued(next))
    }
}

fn document_count(operation: &WriteOperation) -> usize {
    match operation {
        WriteOperation::SendData { documents, .. } => documents.len(),
        WriteOperation::SendDeletes { doc_ids, .. } => doc_ids.len(),
        WriteOperation::SendOtherIndexUpdates { titles, .. } => titles.len(),
    }
}

fn humanize(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis())
}
