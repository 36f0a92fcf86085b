pub mod counters;
pub mod observer;
pub mod queue;
pub mod types;
pub mod worker;

pub use queue::{JobQueue, MemoryJobQueue};
pub use types::{ALERTS_QUEUE, Job, JobError, JobHandler, JobOptions, JobSummary, MARKET_DATA_QUEUE};
pub use worker::{WorkerConfig, WorkerPool};
