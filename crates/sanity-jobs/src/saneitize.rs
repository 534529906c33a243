//! The saneitize loop: seeds checker jobs over the whole page-id space.
//!
//! Each invocation (typically from a periodic timer) pushes up to
//! `max_checker_jobs` chunked checker jobs starting at the stored offset,
//! spreading their release timestamps over the refresh period. Once the
//! offset passes the largest page id a new loop starts from the smallest
//! one, but never sooner than `min_loop_duration` after the previous start.
//!
//! Loop state lives in the queue's `loops` keyspace under the job name.

use sanity_cluster::ClusterError;
use sanity_queue::JobId;
use sanity_types::{CheckerJobParams, Job, LoopState, PageId, Timestamp};
use tracing::{info, instrument};

use crate::context::JobContext;
use crate::error::JobError;
use crate::pressure::checker_pressure;

/// Chunking and pacing of one loop.
#[derive(Debug, Clone)]
pub struct SaneitizeLoop {
    profile: String,
    refresh_freq: u64,
    chunk_size: u64,
    min_loop_duration: u64,
}

impl SaneitizeLoop {
    /// Loop producing jobs for `profile` in chunks of `chunk_size` ids,
    /// released over `refresh_freq` seconds.
    pub fn new(
        profile: impl Into<String>,
        refresh_freq: u64,
        chunk_size: u64,
        min_loop_duration: u64,
    ) -> Self {
        Self {
            profile: profile.into(),
            refresh_freq,
            chunk_size: chunk_size.max(1),
            min_loop_duration,
        }
    }

    /// Produce up to `max_jobs` checker jobs, advancing `state`.
    ///
    /// Returns each job with its release timestamp, earliest first.
    pub fn run(
        &self,
        state: &mut LoopState,
        max_jobs: u64,
        min_id: PageId,
        max_id: PageId,
        now: Timestamp,
    ) -> Vec<(CheckerJobParams, Timestamp)> {
        let mut jobs = Vec::new();
        for i in 0..max_jobs {
            let Some(params) = self.next_job(state, min_id, max_id, now) else {
                break;
            };
            let delay = self.refresh_freq.saturating_mul(i) / max_jobs;
            jobs.push((params, now.saturating_add(delay)));
        }
        jobs
    }

    fn next_job(
        &self,
        state: &mut LoopState,
        min_id: PageId,
        max_id: PageId,
        now: Timestamp,
    ) -> Option<CheckerJobParams> {
        let mut begin = state.id_offset.max(min_id);
        if begin > max_id {
            let since_last = now.saturating_sub(state.last_loop);
            if since_last < self.min_loop_duration {
                info!(
                    job_name = %state.job_name,
                    loop_id = state.loop_id,
                    since_last,
                    min_loop_duration = self.min_loop_duration,
                    "last loop ended too soon, waiting before the next one"
                );
                return None;
            }
            begin = min_id;
            state.loop_id += 1;
            state.last_loop = now;
            state.ids_sent = 0;
            state.jobs_sent = 0;
            info!(job_name = %state.job_name, loop_id = state.loop_id, "starting new loop");
        }

        let end = begin.saturating_add(self.chunk_size - 1).min(max_id);
        let ids = end - begin + 1;
        state.id_offset = end.saturating_add(1);
        state.ids_sent += ids;
        state.ids_sent_total += ids;
        state.jobs_sent += 1;
        state.jobs_sent_total += 1;
        state.updated = now;

        Some(CheckerJobParams::new(
            begin,
            end,
            self.profile.clone(),
            state.cluster.clone(),
            state.loop_id,
            now,
        ))
    }
}

/// Result of one [`push_jobs`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    /// Profile selected for the page-id span.
    pub profile: String,
    /// Ids of the checker jobs pushed.
    pub jobs: Vec<JobId>,
    /// Loop state after the push.
    pub state: LoopState,
}

/// Push the next checker jobs of the loop stored as `job_name`.
///
/// Picks the profile from the page-id span, refuses to run when the
/// checker queue is already full, creates the loop on first use and stores
/// it back when jobs were pushed. A stored loop created for another
/// cluster selection is an error.
#[instrument(skip(ctx))]
pub async fn push_jobs(
    ctx: &JobContext,
    job_name: &str,
    cluster: Option<&str>,
    refresh_freq: u64,
) -> Result<PushReport, JobError> {
    if let Some(name) = cluster {
        if !ctx.clusters.writable_clusters().contains(name) {
            return Err(ClusterError::NotWritable(name.to_string()).into());
        }
    } else if ctx.clusters.writable_clusters().is_empty() {
        return Err(JobError::NoWritableClusters);
    }

    let (min_id, max_id) = ctx
        .pages
        .page_id_bounds()
        .await?
        .ok_or(JobError::EmptyPageStore)?;
    let span = max_id - min_id;
    let profile_name = ctx
        .profiles
        .select_for_span(span)
        .ok_or(JobError::NoProfile { span })?
        .to_string();
    info!(span, profile = %profile_name, "selected profile");
    let profile = ctx.profiles.loop_profile(&profile_name)?;

    let pending = checker_pressure(&ctx.queue)?;
    if pending as u64 >= profile.max_checker_jobs {
        return Err(JobError::TooManyCheckerJobs {
            pending,
            max: profile.max_checker_jobs,
        });
    }
    info!(pending, "checker jobs in the queue");

    let now = ctx.clock.now();
    let mut state = match ctx.queue.get_loop_state(job_name)? {
        Some(state) => {
            check_cluster(&state, cluster)?;
            state
        }
        None => LoopState::new(job_name, cluster.map(str::to_string), min_id, now),
    };

    let saneitize = SaneitizeLoop::new(
        profile_name.clone(),
        refresh_freq,
        profile.jobs_chunk_size,
        profile.min_loop_duration,
    );
    let jobs = saneitize.run(
        &mut state,
        profile.max_checker_jobs,
        min_id,
        max_id,
        now,
    );
    let mut ids = Vec::with_capacity(jobs.len());
    for (params, release_at) in jobs {
        ids.push(ctx.queue.push(Job::Checker(params), Some(release_at))?);
    }
    if !ids.is_empty() {
        ctx.queue.put_loop_state(&state)?;
    }
    info!(
        pushed = ids.len(),
        offset = state.id_offset,
        loop_id = state.loop_id,
        "pushed checker jobs"
    );

    Ok(PushReport {
        profile: profile_name,
        jobs: ids,
        state,
    })
}

/// Progress of the loop stored as `job_name`.
pub async fn loop_status(ctx: &JobContext, job_name: &str) -> Result<LoopStatus, JobError> {
    let state = ctx
        .queue
        .get_loop_state(job_name)?
        .ok_or_else(|| JobError::UnknownLoop(job_name.to_string()))?;
    let (min_id, max_id) = ctx
        .pages
        .page_id_bounds()
        .await?
        .ok_or(JobError::EmptyPageStore)?;
    let span = max_id - min_id;
    let profile_name = ctx
        .profiles
        .select_for_span(span)
        .ok_or(JobError::NoProfile { span })?;
    let profile = ctx.profiles.loop_profile(profile_name)?;
    Ok(LoopStatus::compute(
        &state,
        max_id,
        profile.min_loop_duration,
        ctx.clock.now(),
    ))
}

/// Forget the loop stored as `job_name`, returning its last state.
pub fn delete_loop(ctx: &JobContext, job_name: &str) -> Result<LoopState, JobError> {
    let state = ctx
        .queue
        .get_loop_state(job_name)?
        .ok_or_else(|| JobError::UnknownLoop(job_name.to_string()))?;
    ctx.queue.delete_loop_state(job_name)?;
    info!(job_name, "deleted loop");
    Ok(state)
}

fn check_cluster(state: &LoopState, cluster: Option<&str>) -> Result<(), JobError> {
    if state.cluster.as_deref() != cluster {
        return Err(JobError::ClusterMismatch {
            stored: state.cluster.clone(),
            requested: cluster.map(str::to_string),
        });
    }
    Ok(())
}

/// Progress figures of a loop, as shown to operators.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatus {
    /// The stored state.
    pub state: LoopState,
    /// Ids left before the current loop ends.
    pub ids_todo: u64,
    /// Jobs per hour since the current loop started.
    pub jobs_per_hour: f64,
    /// Jobs per hour since the loop was created.
    pub jobs_per_hour_total: f64,
    /// Ids per hour since the current loop started.
    pub ids_per_hour: f64,
    /// Ids per hour since the loop was created.
    pub ids_per_hour_total: f64,
    /// Estimated end of the current loop.
    pub eta: Timestamp,
    /// Earliest start of the next loop.
    pub next_loop_min: Timestamp,
}

impl LoopStatus {
    /// Derive progress figures from `state` at `now`.
    pub fn compute(
        state: &LoopState,
        max_id: PageId,
        min_loop_duration: u64,
        now: Timestamp,
    ) -> Self {
        let loop_secs = now.saturating_sub(state.last_loop).max(1) as f64;
        let total_secs = now.saturating_sub(state.created).max(1) as f64;
        let per_hour = |count: u64, secs: f64| count as f64 / secs * 3600.0;
        let ids_todo = max_id.saturating_sub(state.id_offset);
        let ids_rate = state.ids_sent as f64 / loop_secs;
        let eta = if ids_rate > 0.0 {
            now.saturating_add((ids_todo as f64 / ids_rate) as u64)
        } else {
            now
        };
        Self {
            state: state.clone(),
            ids_todo,
            jobs_per_hour: per_hour(state.jobs_sent, loop_secs),
            jobs_per_hour_total: per_hour(state.jobs_sent_total, total_secs),
            ids_per_hour: per_hour(state.ids_sent, loop_secs),
            ids_per_hour_total: per_hour(state.ids_sent_total, total_secs),
            eta,
            next_loop_min: state.last_loop.saturating_add(min_loop_duration),
        }
    }
}
