use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub jobs_completed: Arc<AtomicU64>,
    pub jobs_retried: Arc<AtomicU64>,
    pub jobs_dead_lettered: Arc<AtomicU64>,

    pub items_processed: Arc<AtomicU64>,
    pub items_failed: Arc<AtomicU64>,
}
