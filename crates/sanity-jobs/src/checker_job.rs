//! Checker jobs: scan one page-id range against every target cluster.
//!
//! A run validates its profile and range, resolves clusters, then walks the
//! range batch by batch. Before each batch it samples the update backlog
//! and its own elapsed time; over either budget it stops and pushes a
//! follow-up job starting at the batch it did not run. A cluster whose
//! index cannot be read is requeued on its own and dropped from the run
//! while the others continue. A page-store failure fails the whole run.
//!
//! Bad parameters never fail the job: they are logged and the run ends as
//! [`CheckerState::Skipped`], since retrying cannot fix them.

use std::collections::BTreeMap;
use std::sync::Arc;

use sanity_cluster::{JobDelay, SelectionOptions};
use sanity_repair::{
    AllClustersQueueingRemediator, CheckError, Checker, IsOldFn, MultiClusterRemediatorHelper, PageCache,
    QueueingRemediator,
};
use sanity_types::{CheckerJobParams, Job, PageId, PageRecord};
use tracing::{debug, error, info, instrument, warn};

use crate::context::JobContext;
use crate::error::JobError;

/// A checker job that already retried this many times is abandoned.
pub const CHECKER_JOB_MAX_RETRIES: u32 = 3;

/// How a checker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerState {
    /// Nothing was checked: bad parameters or no cluster to check.
    Skipped,
    /// The whole range was walked on every cluster.
    Done,
    /// A budget was exceeded or a cluster failed, and the remainder was
    /// requeued.
    Requeued,
    /// A budget was exceeded or a cluster failed, and the retry cap was
    /// reached.
    Abandoned,
}

/// What one checker run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerReport {
    /// Final state.
    pub state: CheckerState,
    /// Batches checked.
    pub batches: usize,
    /// Page ids checked, counted once per batch.
    pub checked: u64,
    /// Pages that needed fixing, summed over clusters.
    pub fixed: usize,
    /// Follow-up jobs pushed, per-cluster ones included.
    pub requeued: Vec<CheckerJobParams>,
    /// Clusters dropped from the run after a failed index read.
    pub dropped: Vec<String>,
}

impl CheckerReport {
    fn new(state: CheckerState) -> Self {
        Self {
            state,
            batches: 0,
            checked: 0,
            fixed: 0,
            requeued: Vec::new(),
            dropped: Vec::new(),
        }
    }
}

/// Predicate selecting one page in `reindex_after_loops` for a forced
/// re-index, rotating with `loop_id` so every page is picked once every
/// `reindex_after_loops` loops.
pub fn make_is_old(loop_id: u64, reindex_after_loops: u64) -> IsOldFn {
    let modulus = reindex_after_loops.max(1);
    let loop_mod = loop_id % modulus;
    Arc::new(move |page: &PageRecord| page.page_id % modulus == loop_mod)
}

/// One execution of a checker job.
#[derive(Debug, Clone)]
pub struct CheckerJob {
    params: CheckerJobParams,
}

impl CheckerJob {
    /// Job for `params`.
    pub fn new(params: CheckerJobParams) -> Self {
        Self { params }
    }

    /// Parameters of this job.
    pub fn params(&self) -> &CheckerJobParams {
        &self.params
    }

    /// Run the job to completion or to its first budget overrun.
    #[instrument(
        skip_all,
        fields(
            from = self.params.from_page_id,
            to = self.params.to_page_id,
            retry = self.params.retry_count,
            cluster = ?self.params.cluster,
        )
    )]
    pub async fn run(&self, ctx: &JobContext) -> Result<CheckerReport, JobError> {
        let params = &self.params;
        let profile = match ctx.profiles.sanitize_profile(&params.profile) {
            Ok(profile) => profile,
            Err(err) => {
                warn!(profile = %params.profile, error = %err, "cannot run checker job: invalid profile");
                return Ok(CheckerReport::new(CheckerState::Skipped));
            }
        };

        let connections =
            match ctx
                .clusters
                .decide_clusters(params.cluster.as_deref(), &SelectionOptions::default())
            {
                Ok(connections) => connections,
                Err(err) => {
                    error!(error = %err, "cannot run checker job");
                    return Ok(CheckerReport::new(CheckerState::Skipped));
                }
            };
        if connections.is_empty() {
            debug!("no cluster to check");
            return Ok(CheckerReport::new(CheckerState::Skipped));
        }

        let (from, to) = (params.from_page_id, params.to_page_id);
        if from > to {
            warn!(from, to, "cannot run checker job: from > to, job is corrupted?");
            return Ok(CheckerReport::new(CheckerState::Skipped));
        }
        if to - from > profile.jobs_chunk_size {
            warn!(
                from,
                to,
                chunk_size = profile.jobs_chunk_size,
                "cannot run checker job: range larger than chunk size, job is corrupted or profile mismatch?"
            );
            return Ok(CheckerReport::new(CheckerState::Skipped));
        }

        let start = ctx.clock.now();
        debug!(
            clusters = ?connections.keys().collect::<Vec<_>>(),
            waited = start.saturating_sub(params.created_at),
            "running checker job"
        );

        let is_old = profile
            .reindex_after_loops
            .map(|n| make_is_old(params.loop_id, n));
        let mut checkers: BTreeMap<String, Checker> = BTreeMap::new();
        let mut helper = MultiClusterRemediatorHelper::new(Box::new(
            AllClustersQueueingRemediator::new(ctx.queue.clone(), ctx.clusters.clone()),
        ));
        for (name, connection) in connections {
            let mut checker = Checker::new(
                name.clone(),
                connection.client,
                ctx.pages.clone(),
                ctx.index_config.clone(),
            )
            .metrics(ctx.metrics.clone())
            .log_sane(ctx.log_sane);
            if let Some(is_old) = &is_old {
                checker = checker.is_old(is_old.clone());
            }
            helper.add_cluster(
                name.clone(),
                Box::new(QueueingRemediator::new(ctx.queue.clone(), Some(name.clone()))),
            );
            checkers.insert(name, checker);
        }

        let mut report = CheckerReport::new(CheckerState::Done);
        let mut abandoned = false;
        let mut cache = PageCache::new();
        let mut batch_start = from;
        loop {
            let batch_end = batch_start
                .saturating_add(profile.checker_batch_size - 1)
                .min(to);

            let stop_cause = if ctx.pressure.pressure()? > profile.update_jobs_max_pressure {
                Some("too much pressure on update jobs")
            } else if ctx.clock.now().saturating_sub(start) > profile.checker_job_max_time {
                Some("execution time exceeded checker_job_max_time")
            } else {
                None
            };
            if let Some(cause) = stop_cause {
                report.state = match self.retry(ctx, cause, batch_start, None)? {
                    Some(next) => {
                        report.requeued.push(next);
                        CheckerState::Requeued
                    }
                    None => CheckerState::Abandoned,
                };
                return Ok(report);
            }

            let ids: Vec<PageId> = (batch_start..=batch_end).collect();
            cache.clear();
            let mut failed = Vec::new();
            for (name, checker) in &checkers {
                let Some(buffer) = helper.buffer_mut(name) else {
                    continue;
                };
                match checker.check(&ids, &mut cache, buffer).await {
                    Ok(fixed) => report.fixed += fixed,
                    Err(err @ CheckError::Fetch { .. }) => {
                        let cause = format!("Failed to verify ids: {err}");
                        match self.retry(ctx, &cause, batch_start, Some(name))? {
                            Some(next) => report.requeued.push(next),
                            None => abandoned = true,
                        }
                        failed.push(name.clone());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            for name in &failed {
                checkers.remove(name);
                helper.remove_cluster(name);
            }
            report.dropped.extend(failed);
            helper.send_batch()?;
            report.batches += 1;
            report.checked += ids.len() as u64;

            if checkers.is_empty() || batch_end >= to {
                break;
            }
            batch_start = batch_end + 1;
        }
        if !report.dropped.is_empty() {
            report.state = if abandoned {
                CheckerState::Abandoned
            } else {
                CheckerState::Requeued
            };
        }

        info!(
            state = ?report.state,
            batches = report.batches,
            checked = report.checked,
            fixed = report.fixed,
            dropped = ?report.dropped,
            "checker job done"
        );
        Ok(report)
    }

    /// Push a follow-up job starting at `new_from`, unless the retry cap is
    /// reached. `cluster` narrows the follow-up to one cluster.
    fn retry(
        &self,
        ctx: &JobContext,
        cause: &str,
        new_from: PageId,
        cluster: Option<&str>,
    ) -> Result<Option<CheckerJobParams>, JobError> {
        let params = &self.params;
        let target = cluster.or(params.cluster.as_deref());
        if params.retry_count >= CHECKER_JOB_MAX_RETRIES {
            info!(
                cause,
                retries = params.retry_count,
                from = params.from_page_id,
                to = params.to_page_id,
                cluster = target.unwrap_or("all clusters"),
                "abandoning checker job (jobs_chunk_size too high?)"
            );
            return Ok(None);
        }

        let next = CheckerJobParams {
            from_page_id: new_from,
            retry_count: params.retry_count + 1,
            cluster: target.map(str::to_string),
            ..params.clone()
        };
        let job = Job::Checker(next.clone());
        let delay = ctx.backoff.delay(job.type_name(), params.retry_count);
        let release = JobDelay::after(ctx.clock.now(), delay);
        let id = ctx.queue.push(job, Some(release.release_at))?;
        info!(
            cause,
            id,
            from = next.from_page_id,
            to = next.to_page_id,
            cluster = target.unwrap_or("all clusters"),
            delay,
            "requeueing checker job"
        );
        Ok(Some(next))
    }
}
