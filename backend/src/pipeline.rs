//! The market-data job handler: the spine of the pipeline.
//!
//! One job carries one feed batch. Items are processed independently (a
//! bad tick never blocks the rest) and per item the flow is:
//!
//!   contract upsert → snapshot insert (duplicate = replayed item, skip)
//!   → read window history → detect → dedup → dispatch accepted signals
//!   → record the sample into the window
//!
//! Detection runs against the history BEFORE the new sample so a spike
//! cannot dilute its own baseline. A failed window read degrades to a
//! cold window (detection skipped for that symbol), never to a job
//! failure.

use std::sync::Arc;

use tracing::{debug, info, warn};

use common::time::now_ms;
use jobs::{Job, JobError, JobHandler, JobSummary};
use market::detect::Detector;
use market::store::SnapshotStore;
use market::types::{Contract, FeedTick, MarketSnapshot, WindowSample};
use market::window::WindowCache;
use signal::dedup::{DedupEngine, DedupOutcome};

use delivery::scheduler::DeliveryScheduler;

pub const INGEST_JOB: &str = "ingest-batch";

pub struct MarketDataHandler {
    store: Arc<dyn SnapshotStore>,
    windows: Arc<dyn WindowCache>,
    detector: Detector,
    dedup: Arc<DedupEngine>,
    scheduler: Arc<DeliveryScheduler>,
}

impl MarketDataHandler {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        windows: Arc<dyn WindowCache>,
        detector: Detector,
        dedup: Arc<DedupEngine>,
        scheduler: Arc<DeliveryScheduler>,
    ) -> Self {
        Self {
            store,
            windows,
            detector,
            dedup,
            scheduler,
        }
    }

    async fn process_tick(&self, tick: &FeedTick) -> anyhow::Result<()> {
        let now = now_ms();

        self.store.upsert_contract(&Contract::from_tick(tick)).await?;

        let snapshot = MarketSnapshot::from_tick(tick);
        if !self.store.insert_snapshot(&snapshot).await? {
            // Same (symbol, ts) already stored: a replayed job item.
            // No window touch, no re-detection.
            debug!(symbol = %snapshot.symbol, ts_ms = snapshot.ts_ms, "duplicate snapshot skipped");
            return Ok(());
        }

        let history = match self.windows.read(&snapshot.symbol, now).await {
            Ok(h) => h,
            Err(e) => {
                debug!(
                    symbol = %snapshot.symbol,
                    error = %e,
                    "window cache unavailable; treating window as cold"
                );
                Vec::new()
            }
        };

        for candidate in self.detector.evaluate(&snapshot, &history, now) {
            match self.dedup.apply(&candidate, now).await? {
                DedupOutcome::Accepted(sig) => {
                    info!(
                        symbol = %sig.symbol,
                        kind = %sig.kind,
                        strength = sig.strength,
                        signal_id = %sig.id,
                        "signal accepted"
                    );
                    self.scheduler.dispatch(&sig, now).await?;
                }
                DedupOutcome::Suppressed {
                    signal_id,
                    cooldown_until_ms,
                } => {
                    debug!(
                        symbol = %candidate.symbol,
                        kind = %candidate.kind,
                        signal_id = %signal_id,
                        cooldown_until_ms,
                        "repeat signal suppressed"
                    );
                }
            }
        }

        if let Err(e) = self
            .windows
            .record(&snapshot.symbol, WindowSample::from(&snapshot), now)
            .await
        {
            debug!(symbol = %snapshot.symbol, error = %e, "window record failed");
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl JobHandler for MarketDataHandler {
    async fn handle(&self, job: &Job) -> Result<JobSummary, JobError> {
        let ticks: Vec<FeedTick> = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Permanent(format!("malformed ingest payload: {e}")))?;

        let mut summary = JobSummary::default();

        for tick in &ticks {
            match self.process_tick(tick).await {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    warn!(symbol = %tick.symbol, error = %e, "tick processing failed");
                    summary.failed_items += 1;
                }
            }
        }

        // A batch where nothing went through points at the store/queue
        // being down, which is worth a retry; partial failure is not.
        if summary.processed == 0 && summary.failed_items > 0 {
            return Err(JobError::Transient(format!(
                "all {} batch items failed",
                summary.failed_items
            )));
        }

        Ok(summary)
    }
}

/// Rebuild window baselines from the snapshot store after a restart, so
/// detection does not start cold for symbols that were live before.
pub async fn seed_windows(
    store: &dyn SnapshotStore,
    windows: &dyn WindowCache,
    capacity: usize,
    now_ms: u64,
) -> anyhow::Result<usize> {
    let symbols = store.active_symbols().await?;
    let mut seeded = 0usize;

    for symbol in &symbols {
        let recent = store.load_recent(symbol, capacity).await?;
        if recent.is_empty() {
            continue;
        }

        for snap in &recent {
            windows
                .record(symbol, WindowSample::from(snap), now_ms)
                .await?;
        }
        seeded += 1;
    }

    debug!(symbols = symbols.len(), seeded, "window baselines reseeded");
    Ok(seeded)
}
