//! Named job queues.
//!
//! `MemoryJobQueue` is the in-process implementation: one bounded mpsc
//! channel per queue name, created on first use. The bounded capacity is
//! the backpressure seam: if workers fall behind, enqueueing blocks
//! instead of growing memory without limit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

use crate::types::{Job, JobOptions};

#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; waits when the queue is at capacity. Errors only
    /// when the queue has shut down.
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: Value,
        opts: JobOptions,
    ) -> anyhow::Result<Uuid>;
}

struct QueueInner {
    tx: Sender<Job>,
    rx: Mutex<Option<Receiver<Job>>>,
}

pub struct MemoryJobQueue {
    capacity: usize,
    queues: Mutex<HashMap<String, Arc<QueueInner>>>,
}

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl MemoryJobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn inner(&self, queue: &str) -> Arc<QueueInner> {
        let mut queues = self.queues.lock();
        queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.capacity);
                Arc::new(QueueInner {
                    tx,
                    rx: Mutex::new(Some(rx)),
                })
            })
            .clone()
    }

    /// Hand the consume side of a queue to a worker pool. Each queue has
    /// exactly one consumer; a second take returns None.
    pub fn take_receiver(&self, queue: &str) -> Option<Receiver<Job>> {
        self.inner(queue).rx.lock().take()
    }

    /// Producer handle for a queue; used by the worker pool to re-enqueue
    /// retries.
    pub fn sender(&self, queue: &str) -> Sender<Job> {
        self.inner(queue).tx.clone()
    }
}

#[async_trait::async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: Value,
        opts: JobOptions,
    ) -> anyhow::Result<Uuid> {
        let job = Job::new(queue, name, payload, opts);
        let id = job.id;

        self.inner(queue)
            .tx
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("queue '{}' is closed", queue))?;

        Ok(id)
    }
}
