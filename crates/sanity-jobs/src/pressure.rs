//! Backlog gauges used for backpressure.

use sanity_queue::JobQueue;
use sanity_types::queues;

use crate::error::JobError;

/// Approximate size of the downstream write backlog.
pub trait PressureGauge: Send + Sync {
    /// Current reading.
    fn pressure(&self) -> Result<u64, JobError>;
}

/// Sum of ready and delayed jobs over every update queue.
impl PressureGauge for JobQueue {
    fn pressure(&self) -> Result<u64, JobError> {
        let mut total = 0u64;
        for queue in queues::UPDATE_QUEUES {
            total += self.len(queue)? as u64;
        }
        Ok(total)
    }
}

/// Number of checker jobs waiting in the queue, delayed or not.
pub fn checker_pressure(queue: &JobQueue) -> Result<usize, JobError> {
    Ok(queue.len(queues::CHECKER)?)
}
