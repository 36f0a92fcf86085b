//! Shared job types.
//!
//! A worker's processing function returns an explicit result, not a
//! callback chain. The harness alone decides, from that result plus the attempt
//! counter, whether a job completes, retries after backoff, or
//! dead-letters.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Ingestion queue: snapshot batches and contract updates.
pub const MARKET_DATA_QUEUE: &str = "market-data";
/// Delivery queue: one job per single notification send.
pub const ALERTS_QUEUE: &str = "alerts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Total executions a job may consume, counting the first.
    pub max_attempts: u32,
    /// First retry delay; subsequent delays double (2s, 4s, 8s, ...).
    pub backoff_base: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// Delay inserted after attempt `attempt` fails transiently, before the
/// next execution: base · 2^(attempt−1).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: Value,
    /// 1-based execution counter.
    pub attempt: u32,
    pub opts: JobOptions,
}

impl Job {
    pub fn new(queue: &str, name: &str, payload: Value, opts: JobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            name: name.to_string(),
            payload,
            attempt: 1,
            opts,
        }
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.opts.max_attempts
    }
}

/// Typed failure a handler reports back to the harness.
#[derive(Debug, Error)]
pub enum JobError {
    /// Worth retrying (store/network timeout); follows the backoff policy.
    #[error("transient job failure: {0}")]
    Transient(String),
    /// Retrying cannot help (bad address, malformed payload); dead-letters
    /// immediately.
    #[error("permanent job failure: {0}")]
    Permanent(String),
}

/// Per-job outcome summary. Batch handlers report item-level failures here
/// instead of failing the whole job.
#[derive(Debug, Clone, Default)]
pub struct JobSummary {
    pub processed: usize,
    pub failed_items: usize,
    pub note: Option<String>,
}

pub type JobResult = Result<JobSummary, JobError>;

#[async_trait::async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> JobResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_from_the_base() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn final_attempt_is_reached_at_max() {
        let mut job = Job::new(MARKET_DATA_QUEUE, "ingest-batch", Value::Null, JobOptions::default());
        assert!(!job.is_final_attempt());
        job.attempt = 3;
        assert!(job.is_final_attempt());
    }
}
