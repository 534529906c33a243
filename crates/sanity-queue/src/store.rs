//! [`JobQueue`] implementation wrapping Fjall keyspaces.

use std::path::Path;
use std::sync::Mutex;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use sanity_types::{Job, LoopState, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::QueueError;

type Result<T> = std::result::Result<T, QueueError>;

/// Identifier assigned to a job when it is first pushed.
pub type JobId = u64;

const NEXT_ID_KEY: &[u8] = b"next_id";

/// A job as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Queue-assigned identifier.
    pub id: JobId,
    /// The job itself.
    pub job: Job,
    /// Earliest time a worker may claim the job. Advisory.
    pub release_at: Timestamp,
    /// Times a worker has already run this job and failed.
    pub attempts: u32,
}

/// Per-queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs claimable right now.
    pub size: usize,
    /// Jobs whose release timestamp lies in the future.
    pub delayed: usize,
    /// Jobs currently held by a worker.
    pub claimed: usize,
}

/// Durable job queue backed by Fjall.
pub struct JobQueue {
    /// The underlying Fjall database handle.
    #[allow(dead_code)]
    db: Database,
    /// JobId → serialized QueuedJob.
    jobs: Keyspace,
    /// queue ++ 0 ++ release_at (8 bytes BE) ++ id (8 bytes BE) → empty.
    ready: Keyspace,
    /// JobId → queue name.
    claimed: Keyspace,
    /// Dedup key → JobId.
    dedup: Keyspace,
    /// Loop name → serialized LoopState.
    loops: Keyspace,
    /// Counters.
    meta: Keyspace,
    /// Serializes read-modify-write sequences across keyspaces.
    lock: Mutex<()>,
    /// Directory of a temporary queue; must outlive `db`.
    _tempdir: Option<tempfile::TempDir>,
}

impl JobQueue {
    /// Open a persistent queue at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary queue that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tempdir: Option<tempfile::TempDir>) -> Result<Self> {
        let jobs = db.keyspace("jobs", KeyspaceCreateOptions::default)?;
        let ready = db.keyspace("ready", KeyspaceCreateOptions::default)?;
        let claimed = db.keyspace("claimed", KeyspaceCreateOptions::default)?;
        let dedup = db.keyspace("dedup", KeyspaceCreateOptions::default)?;
        let loops = db.keyspace("loops", KeyspaceCreateOptions::default)?;
        let meta = db.keyspace("meta", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            jobs,
            ready,
            claimed,
            dedup,
            loops,
            meta,
            lock: Mutex::new(()),
            _tempdir: tempdir,
        })
    }

    // ----- Push / claim / ack -----

    /// Push a job, claimable from `release_at` on (immediately when `None`).
    ///
    /// A job with a dedup key that matches an unclaimed job is merged into
    /// it instead of being stored twice; the later release timestamp wins.
    /// Returns the id of the stored job.
    pub fn push(&self, job: Job, release_at: Option<Timestamp>) -> Result<JobId> {
        let _guard = self.lock.lock().expect("lock poisoned");
        let release_at = release_at.unwrap_or(0);

        if let Some(key) = job.dedup_key() {
            if let Some(existing_id) = self.dedup_lookup(&key)? {
                if let Some(mut existing) = self.get_job(existing_id)? {
                    if release_at > existing.release_at {
                        let queue = existing.job.queue_name();
                        let old_key = ready_key(queue, existing.release_at, existing_id);
                        self.ready.remove(old_key.as_slice())?;
                        existing.release_at = release_at;
                        self.put_job(&existing)?;
                        let new_key = ready_key(queue, release_at, existing_id);
                        self.ready.insert(new_key.as_slice(), b"")?;
                    }
                    debug!(id = existing_id, dedup_key = %key, "merged duplicate job");
                    return Ok(existing_id);
                }
            }
        }

        let id = self.next_id()?;
        let queued = QueuedJob {
            id,
            job,
            release_at,
            attempts: 0,
        };
        self.put_job(&queued)?;
        let queue = queued.job.queue_name();
        let key = ready_key(queue, release_at, id);
        self.ready.insert(key.as_slice(), b"")?;
        if let Some(key) = queued.job.dedup_key() {
            self.dedup.insert(key.as_bytes(), &id.to_be_bytes())?;
        }
        debug!(
            id,
            queue,
            job_type = queued.job.type_name(),
            release_at,
            "pushed job"
        );
        Ok(id)
    }

    /// Claim the earliest releasable job of `queue`, or `None` if nothing is
    /// ready at `now`.
    ///
    /// A claimed job no longer takes part in de-duplication.
    pub fn claim(&self, queue: &str, now: Timestamp) -> Result<Option<QueuedJob>> {
        let _guard = self.lock.lock().expect("lock poisoned");

        let Some(first) = self.ready.prefix(queue_prefix(queue).as_slice()).next() else {
            return Ok(None);
        };
        let key = first.key()?;
        let (release_at, id) = parse_ready_key(&key, queue)?;
        if release_at > now {
            return Ok(None);
        }

        let queued = self
            .get_job(id)?
            .ok_or_else(|| QueueError::Corrupt(format!("ready entry for missing job {id}")))?;
        self.ready.remove(key.as_ref())?;
        if let Some(dedup_key) = queued.job.dedup_key() {
            if self.dedup_lookup(&dedup_key)? == Some(id) {
                self.dedup.remove(dedup_key.as_bytes())?;
            }
        }
        self.claimed.insert(&id.to_be_bytes(), queue.as_bytes())?;
        debug!(id, queue, "claimed job");
        Ok(Some(queued))
    }

    /// Acknowledge a claimed job, removing it for good.
    pub fn ack(&self, id: JobId) -> Result<()> {
        let _guard = self.lock.lock().expect("lock poisoned");
        self.claimed.remove(&id.to_be_bytes())?;
        self.jobs.remove(&id.to_be_bytes())?;
        debug!(id, "acked job");
        Ok(())
    }

    /// Return a claimed job to its queue after a failed run.
    ///
    /// The job keeps its id, its attempt counter is incremented and it is
    /// not re-registered for de-duplication.
    pub fn release(&self, id: JobId, release_at: Timestamp) -> Result<Option<QueuedJob>> {
        let _guard = self.lock.lock().expect("lock poisoned");
        let Some(mut queued) = self.get_job(id)? else {
            return Ok(None);
        };
        queued.attempts += 1;
        queued.release_at = release_at;
        self.put_job(&queued)?;
        self.claimed.remove(&id.to_be_bytes())?;
        let key = ready_key(queued.job.queue_name(), release_at, id);
        self.ready.insert(key.as_slice(), b"")?;
        debug!(
            id,
            attempts = queued.attempts,
            release_at,
            "released job for retry"
        );
        Ok(Some(queued))
    }

    // ----- Inspection -----

    /// Look up a job by id, claimed or not.
    pub fn get(&self, id: JobId) -> Result<Option<QueuedJob>> {
        self.get_job(id)
    }

    /// Unclaimed jobs of `queue`, earliest release first.
    pub fn list(&self, queue: &str) -> Result<Vec<QueuedJob>> {
        let mut out = Vec::new();
        for guard in self.ready.prefix(queue_prefix(queue).as_slice()) {
            let key = guard.key()?;
            let (_, id) = parse_ready_key(&key, queue)?;
            if let Some(queued) = self.get_job(id)? {
                out.push(queued);
            }
        }
        Ok(out)
    }

    /// Counters for `queue` as seen at `now`.
    ///
    /// Note: this is an O(n) scan of the queue.
    pub fn stats(&self, queue: &str, now: Timestamp) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for guard in self.ready.prefix(queue_prefix(queue).as_slice()) {
            let key = guard.key()?;
            let (release_at, _) = parse_ready_key(&key, queue)?;
            if release_at > now {
                stats.delayed += 1;
            } else {
                stats.size += 1;
            }
        }
        for guard in self.claimed.iter() {
            let value = guard.value()?;
            if value.as_ref() == queue.as_bytes() {
                stats.claimed += 1;
            }
        }
        Ok(stats)
    }

    /// Total number of unclaimed jobs in `queue`, delayed or not.
    pub fn len(&self, queue: &str) -> Result<usize> {
        let mut count = 0;
        for guard in self.ready.prefix(queue_prefix(queue).as_slice()) {
            let _ = guard.key()?;
            count += 1;
        }
        Ok(count)
    }

    /// Delete a job whether or not it is claimed. Returns the removed job.
    pub fn delete(&self, id: JobId) -> Result<Option<QueuedJob>> {
        let _guard = self.lock.lock().expect("lock poisoned");
        let Some(queued) = self.get_job(id)? else {
            return Ok(None);
        };
        let key = ready_key(queued.job.queue_name(), queued.release_at, id);
        self.ready.remove(key.as_slice())?;
        self.claimed.remove(&id.to_be_bytes())?;
        if let Some(dedup_key) = queued.job.dedup_key() {
            if self.dedup_lookup(&dedup_key)? == Some(id) {
                self.dedup.remove(dedup_key.as_bytes())?;
            }
        }
        self.jobs.remove(&id.to_be_bytes())?;
        debug!(id, "deleted job");
        Ok(Some(queued))
    }

    // ----- Saneitize loop state -----

    /// Load the state of the loop stored under `name`.
    pub fn get_loop_state(&self, name: &str) -> Result<Option<LoopState>> {
        match self.loops.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a loop state under its `job_name`.
    pub fn put_loop_state(&self, state: &LoopState) -> Result<()> {
        let value = postcard::to_allocvec(state)?;
        self.loops.insert(state.job_name.as_bytes(), value.as_slice())?;
        debug!(
            job_name = %state.job_name,
            loop_id = state.loop_id,
            id_offset = state.id_offset,
            "stored loop state"
        );
        Ok(())
    }

    /// Forget the loop stored under `name`.
    pub fn delete_loop_state(&self, name: &str) -> Result<()> {
        self.loops.remove(name.as_bytes())?;
        debug!(job_name = name, "deleted loop state");
        Ok(())
    }

    // ----- Internals -----

    fn get_job(&self, id: JobId) -> Result<Option<QueuedJob>> {
        match self.jobs.get(&id.to_be_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_job(&self, queued: &QueuedJob) -> Result<()> {
        let value = postcard::to_allocvec(queued)?;
        self.jobs.insert(&queued.id.to_be_bytes(), value.as_slice())?;
        Ok(())
    }

    fn dedup_lookup(&self, key: &str) -> Result<Option<JobId>> {
        match self.dedup.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_u64(&bytes)?)),
            None => Ok(None),
        }
    }

    fn next_id(&self) -> Result<JobId> {
        let id = match self.meta.get(NEXT_ID_KEY)? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 1,
        };
        self.meta.insert(NEXT_ID_KEY, &(id + 1).to_be_bytes())?;
        Ok(id)
    }
}

/// Scan prefix for one queue: `queue ++ 0`.
fn queue_prefix(queue: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(queue.len() + 1);
    prefix.extend_from_slice(queue.as_bytes());
    prefix.push(0);
    prefix
}

/// Build a ready key: `queue ++ 0 ++ release_at (8 bytes BE) ++ id (8 bytes BE)`.
///
/// Big-endian ensures lexicographic ordering matches numeric ordering.
fn ready_key(queue: &str, release_at: Timestamp, id: JobId) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&release_at.to_be_bytes());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn parse_ready_key(key: &[u8], queue: &str) -> Result<(Timestamp, JobId)> {
    let rest = key
        .get(queue.len() + 1..)
        .filter(|rest| rest.len() == 16)
        .ok_or_else(|| QueueError::Corrupt(format!("bad ready key in queue {queue}")))?;
    Ok((decode_u64(&rest[..8])?, decode_u64(&rest[8..])?))
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| QueueError::Corrupt(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}
