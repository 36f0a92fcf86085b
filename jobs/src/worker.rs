//! Bounded-concurrency worker pool.
//!
//! One pool consumes one queue. Responsibilities:
//! - pull jobs and run them through the handler, at most `concurrency` at
//!   a time
//! - on a transient failure, re-enqueue after exponential backoff while
//!   attempts remain
//! - on a permanent failure or exhausted attempts, dead-letter the job
//!   (removed from retry, retained for inspection)
//! - keep bounded completed/dead-letter history for diagnostics
//! - shut down gracefully: stop pulling, drain in-flight work up to a
//!   deadline, then force-stop
//!
//! The pool NEVER interprets payloads; everything domain-specific lives in
//! the handler.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::observer::{JobObserver, NoopObserver};
use crate::queue::MemoryJobQueue;
use crate::types::{Job, JobError, JobHandler, backoff_delay};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_COMPLETED_RETENTION: usize = 100;
pub const DEFAULT_DEAD_LETTER_RETENTION: usize = 50;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed simultaneously by this pool.
    pub concurrency: usize,
    /// How long in-flight jobs may keep running after shutdown starts.
    pub shutdown_grace: Duration,
    /// Most recent completed jobs kept for diagnostics.
    pub completed_retention: usize,
    /// Most recent dead-lettered jobs kept for diagnostics.
    pub dead_letter_retention: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            shutdown_grace: Duration::from_secs(10),
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            dead_letter_retention: DEFAULT_DEAD_LETTER_RETENTION,
        }
    }
}

/// Terminal record of one job execution, kept in bounded history buffers.
#[derive(Debug, Clone)]
pub struct FinishedJob {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub attempt: u32,
    pub outcome: String,
}

impl FinishedJob {
    fn from_job(job: &Job, outcome: impl Into<String>) -> Self {
        Self {
            id: job.id,
            queue: job.queue.clone(),
            name: job.name.clone(),
            attempt: job.attempt,
            outcome: outcome.into(),
        }
    }
}

/// Bounded history of finished jobs. Oldest entries pruned first.
pub struct JobHistory {
    completed: Mutex<VecDeque<FinishedJob>>,
    dead: Mutex<VecDeque<FinishedJob>>,
    completed_retention: usize,
    dead_retention: usize,
}

impl JobHistory {
    fn new(completed_retention: usize, dead_retention: usize) -> Self {
        Self {
            completed: Mutex::new(VecDeque::new()),
            dead: Mutex::new(VecDeque::new()),
            completed_retention,
            dead_retention,
        }
    }

    fn record_completed(&self, entry: FinishedJob) {
        let mut buf = self.completed.lock();
        buf.push_back(entry);
        while buf.len() > self.completed_retention {
            buf.pop_front();
        }
    }

    fn record_dead(&self, entry: FinishedJob) {
        let mut buf = self.dead.lock();
        buf.push_back(entry);
        while buf.len() > self.dead_retention {
            buf.pop_front();
        }
    }

    pub fn completed(&self) -> Vec<FinishedJob> {
        self.completed.lock().iter().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<FinishedJob> {
        self.dead.lock().iter().cloned().collect()
    }
}

pub struct WorkerPool {
    queue_name: String,
    handler: Arc<dyn JobHandler>,
    /// Producer side of the same queue, used to re-enqueue retries.
    retry_tx: Sender<Job>,
    observer: Arc<dyn JobObserver>,
    cfg: WorkerConfig,
    history: Arc<JobHistory>,
}

/// Handle to a running pool. `shutdown` performs the graceful stop;
/// dropping the handle closes the shutdown channel, which also stops the
/// pool once in-flight work drains.
pub struct PoolHandle {
    shutdown_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
    pub history: Arc<JobHistory>,
}

impl PoolHandle {
    /// Stop pulling new jobs, wait for in-flight work up to the pool's
    /// grace period, then force-stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

impl WorkerPool {
    pub fn new(
        queue_name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        retry_tx: Sender<Job>,
        cfg: WorkerConfig,
    ) -> Self {
        let history = Arc::new(JobHistory::new(
            cfg.completed_retention,
            cfg.dead_letter_retention,
        ));
        Self {
            queue_name: queue_name.into(),
            handler,
            retry_tx,
            observer: Arc::new(NoopObserver),
            cfg,
            history,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Wire a pool to one of `queue`'s named channels and start it.
    /// Fails if the queue's consume side was already claimed.
    pub fn consume(
        queue: &MemoryJobQueue,
        queue_name: &str,
        handler: Arc<dyn JobHandler>,
        cfg: WorkerConfig,
        observer: Arc<dyn JobObserver>,
    ) -> anyhow::Result<PoolHandle> {
        let rx = queue
            .take_receiver(queue_name)
            .ok_or_else(|| anyhow::anyhow!("queue '{}' already has a consumer", queue_name))?;
        let retry_tx = queue.sender(queue_name);

        let pool = WorkerPool::new(queue_name, handler, retry_tx, cfg).with_observer(observer);
        Ok(pool.start(rx))
    }

    pub fn start(self, rx: Receiver<Job>) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let history = Arc::clone(&self.history);

        let join = tokio::spawn(Arc::new(self).run(rx, shutdown_rx));

        PoolHandle {
            shutdown_tx,
            join,
            history,
        }
    }

    async fn run(self: Arc<Self>, mut rx: Receiver<Job>, mut shutdown_rx: watch::Receiver<bool>) {
        let sem = Arc::new(Semaphore::new(self.cfg.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        debug!(
            queue = %self.queue_name,
            concurrency = self.cfg.concurrency,
            "worker pool started"
        );

        loop {
            // Reap whatever already finished so the set stays small.
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => break,
                permit = sem.clone().acquire_owned() => {
                    let Ok(p) = permit else { break };
                    p
                }
            };

            let job = tokio::select! {
                _ = shutdown_rx.changed() => break,
                job = rx.recv() => {
                    let Some(j) = job else { break };
                    j
                }
            };

            let pool = Arc::clone(&self);
            tasks.spawn(async move {
                pool.run_job(job).await;
                drop(permit);
            });
        }

        // Graceful drain: in-flight jobs get the grace period, then are
        // aborted.
        let deadline = tokio::time::Instant::now() + self.cfg.shutdown_grace;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        queue = %self.queue_name,
                        remaining = tasks.len(),
                        "shutdown grace elapsed; aborting in-flight jobs"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        debug!(queue = %self.queue_name, "worker pool stopped");
    }

    async fn run_job(&self, job: Job) {
        let span = info_span!(
            "job",
            queue = %job.queue,
            job_id = %job.id,
            job_name = %job.name,
            attempt = job.attempt
        );

        let result = self.handler.handle(&job).instrument(span.clone()).await;
        let _enter = span.enter();

        match result {
            Ok(summary) => {
                debug!(
                    processed = summary.processed,
                    failed_items = summary.failed_items,
                    "job completed"
                );
                self.observer.on_completed(&job, &summary);
                self.history
                    .record_completed(FinishedJob::from_job(&job, "completed"));
            }

            Err(JobError::Transient(reason)) if !job.is_final_attempt() => {
                let delay = backoff_delay(job.opts.backoff_base, job.attempt);
                warn!(
                    error = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure; retrying after backoff"
                );
                self.observer.on_retry(&job, &reason, delay);

                let retry_tx = self.retry_tx.clone();
                let mut retry = job.clone();
                retry.attempt += 1;

                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if retry_tx.send(retry).await.is_err() {
                        warn!("queue closed; scheduled retry dropped");
                    }
                });
            }

            Err(JobError::Transient(reason)) => {
                self.dead_letter(&job, &reason, "retries exhausted");
            }

            Err(JobError::Permanent(reason)) => {
                self.dead_letter(&job, &reason, "permanent failure");
            }
        }
    }

    fn dead_letter(&self, job: &Job, reason: &str, cause: &str) {
        error!(
            queue = %job.queue,
            job_id = %job.id,
            job_name = %job.name,
            attempt = job.attempt,
            error = %reason,
            "job dead-lettered: {cause}"
        );
        self.observer.on_dead_letter(job, reason);
        self.history
            .record_dead(FinishedJob::from_job(job, format!("{cause}: {reason}")));
    }
}
