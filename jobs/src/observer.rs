//! Observer hook for job lifecycle events.
//!
//! Completion/failure events surface through this synchronous hook instead
//! of implicit callback chains; the default wiring feeds the atomic
//! counters and nothing else.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::counters::Counters;
use crate::types::{Job, JobSummary};

pub trait JobObserver: Send + Sync {
    fn on_completed(&self, _job: &Job, _summary: &JobSummary) {}
    fn on_retry(&self, _job: &Job, _reason: &str, _delay: Duration) {}
    fn on_dead_letter(&self, _job: &Job, _reason: &str) {}
}

pub struct NoopObserver;

impl JobObserver for NoopObserver {}

/// Feeds lifecycle events into `Counters`.
pub struct CountingObserver {
    counters: Counters,
}

impl CountingObserver {
    pub fn new(counters: Counters) -> Self {
        Self { counters }
    }
}

impl JobObserver for CountingObserver {
    fn on_completed(&self, _job: &Job, summary: &JobSummary) {
        self.counters.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .items_processed
            .fetch_add(summary.processed as u64, Ordering::Relaxed);
        self.counters
            .items_failed
            .fetch_add(summary.failed_items as u64, Ordering::Relaxed);
    }

    fn on_retry(&self, _job: &Job, _reason: &str, _delay: Duration) {
        self.counters.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    fn on_dead_letter(&self, _job: &Job, _reason: &str) {
        self.counters
            .jobs_dead_lettered
            .fetch_add(1, Ordering::Relaxed);
    }
}
