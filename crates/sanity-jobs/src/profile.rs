//! Sanitization profiles.
//!
//! Profiles arrive loosely typed from configuration ([`RawProfile`]) and are
//! validated once, when a job starts, into the typed structs the jobs use.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Errors found while validating a profile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    /// No profile is registered under this name.
    #[error("unknown profile {0}")]
    Unknown(String),

    /// A required setting is absent.
    #[error("missing {0}")]
    Missing(&'static str),

    /// A setting that must be positive is not.
    #[error("invalid {field}: {value}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// Value found.
        value: i64,
    },
}

/// A profile as written in configuration. Every setting is optional here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProfile {
    /// Largest page-id span this profile is meant for.
    pub max_wiki_size: Option<u64>,
    /// Backlog of update jobs above which checker jobs back off.
    pub update_jobs_max_pressure: Option<i64>,
    /// Page ids checked per batch.
    pub checker_batch_size: Option<i64>,
    /// Page ids covered by one checker job.
    pub jobs_chunk_size: Option<i64>,
    /// Seconds a checker job may run before requeueing itself.
    pub checker_job_max_time: Option<i64>,
    /// Force a re-index of every page once every this many loops.
    pub reindex_after_loops: Option<i64>,
    /// Minimum seconds between two loop starts.
    pub min_loop_duration: Option<i64>,
    /// Checker jobs allowed in the queue before the loop stops pushing.
    pub max_checker_jobs: Option<i64>,
}

/// Settings a [`CheckerJob`](crate::CheckerJob) runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeProfile {
    /// Backlog of update jobs above which the job requeues itself.
    pub update_jobs_max_pressure: u64,
    /// Page ids per batch.
    pub checker_batch_size: u64,
    /// Largest range one job may cover.
    pub jobs_chunk_size: u64,
    /// Seconds of wall time before the job requeues itself.
    pub checker_job_max_time: u64,
    /// Periodic re-index modulus, if enabled.
    pub reindex_after_loops: Option<u64>,
}

impl SanitizeProfile {
    /// Validate the checker settings of `raw`.
    pub fn validate(raw: &RawProfile) -> Result<Self, ProfileError> {
        Ok(Self {
            update_jobs_max_pressure: positive(
                raw.update_jobs_max_pressure,
                "update_jobs_max_pressure",
            )?,
            checker_batch_size: positive(raw.checker_batch_size, "checker_batch_size")?,
            jobs_chunk_size: positive(raw.jobs_chunk_size, "jobs_chunk_size")?,
            checker_job_max_time: positive(raw.checker_job_max_time, "checker_job_max_time")?,
            // Zero or negative disables the periodic re-index.
            reindex_after_loops: raw
                .reindex_after_loops
                .filter(|&n| n > 0)
                .map(i64::unsigned_abs),
        })
    }
}

/// Settings the [`SaneitizeLoop`](crate::SaneitizeLoop) runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopProfile {
    /// Page ids per checker job.
    pub jobs_chunk_size: u64,
    /// Minimum seconds between two loop starts.
    pub min_loop_duration: u64,
    /// Checker jobs allowed in the queue.
    pub max_checker_jobs: u64,
    /// Update backlog limit, shown by status reports.
    pub update_jobs_max_pressure: u64,
}

impl LoopProfile {
    /// Validate the loop settings of `raw`.
    pub fn validate(raw: &RawProfile) -> Result<Self, ProfileError> {
        let min_loop_duration = match raw.min_loop_duration {
            None => return Err(ProfileError::Missing("min_loop_duration")),
            Some(value) if value < 0 => {
                return Err(ProfileError::Invalid {
                    field: "min_loop_duration",
                    value,
                });
            }
            Some(value) => value.unsigned_abs(),
        };
        Ok(Self {
            jobs_chunk_size: positive(raw.jobs_chunk_size, "jobs_chunk_size")?,
            min_loop_duration,
            max_checker_jobs: positive(raw.max_checker_jobs, "max_checker_jobs")?,
            update_jobs_max_pressure: positive(
                raw.update_jobs_max_pressure,
                "update_jobs_max_pressure",
            )?,
        })
    }
}

fn positive(value: Option<i64>, field: &'static str) -> Result<u64, ProfileError> {
    match value {
        None => Err(ProfileError::Missing(field)),
        Some(value) if value <= 0 => Err(ProfileError::Invalid { field, value }),
        Some(value) => Ok(value.unsigned_abs()),
    }
}

/// Named profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileRepository {
    profiles: BTreeMap<String, RawProfile>,
}

impl Default for ProfileRepository {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRepository {
    /// A repository with no profile.
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    /// The stock profiles, from `XS` (up to 100k ids) to `XL` (up to 1G ids).
    pub fn builtin() -> Self {
        const TWO_WEEKS: i64 = 14 * 24 * 3600;
        let mut repo = Self::empty();
        for (name, max_wiki_size, chunk, batch, pressure, max_jobs) in [
            ("XS", 100_000, 10, 10, 50, 10),
            ("S", 1_000_000, 100, 10, 500, 100),
            ("M", 10_000_000, 1_000, 100, 1_000, 100),
            ("L", 100_000_000, 5_000, 100, 1_500, 200),
            ("XL", 1_000_000_000, 10_000, 100, 2_000, 500),
        ] {
            repo.insert(
                name,
                RawProfile {
                    max_wiki_size: Some(max_wiki_size),
                    update_jobs_max_pressure: Some(pressure),
                    checker_batch_size: Some(batch),
                    jobs_chunk_size: Some(chunk),
                    checker_job_max_time: Some(60),
                    reindex_after_loops: Some(8),
                    min_loop_duration: Some(TWO_WEEKS),
                    max_checker_jobs: Some(max_jobs),
                },
            );
        }
        repo
    }

    /// Register (or replace) a profile.
    pub fn insert(&mut self, name: impl Into<String>, profile: RawProfile) {
        self.profiles.insert(name.into(), profile);
    }

    /// Look up a profile.
    pub fn get(&self, name: &str) -> Option<&RawProfile> {
        self.profiles.get(name)
    }

    /// Every profile, by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawProfile)> {
        self.profiles.iter().map(|(name, raw)| (name.as_str(), raw))
    }

    /// Validated checker settings of the named profile.
    pub fn sanitize_profile(&self, name: &str) -> Result<SanitizeProfile, ProfileError> {
        let raw = self
            .get(name)
            .ok_or_else(|| ProfileError::Unknown(name.to_string()))?;
        SanitizeProfile::validate(raw)
    }

    /// Validated loop settings of the named profile.
    pub fn loop_profile(&self, name: &str) -> Result<LoopProfile, ProfileError> {
        let raw = self
            .get(name)
            .ok_or_else(|| ProfileError::Unknown(name.to_string()))?;
        LoopProfile::validate(raw)
    }

    /// The smallest profile whose `max_wiki_size` exceeds `span`.
    pub fn select_for_span(&self, span: u64) -> Option<&str> {
        let mut sized: Vec<(&str, u64)> = self
            .iter()
            .filter_map(|(name, raw)| raw.max_wiki_size.map(|size| (name, size)))
            .collect();
        sized.sort_by_key(|&(_, size)| size);
        sized
            .into_iter()
            .find(|&(_, size)| size > span)
            .map(|(name, _)| name)
    }
}
