use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use backend::{
    config::AppConfig,
    db::Db,
    feed::{HttpMarketFeed, MarketFeed},
    pipeline::{INGEST_JOB, MarketDataHandler, seed_windows},
    senders::{DiscordWebhookSender, LogSender},
};
use common::{
    logger::{TraceId, init_tracing, root_span},
    time::now_ms,
};
use jobs::{
    ALERTS_QUEUE, JobOptions, JobQueue, MARKET_DATA_QUEUE, MemoryJobQueue, WorkerConfig,
    WorkerPool,
    counters::Counters,
    observer::CountingObserver,
};
use market::{
    detect::{Detector, DetectorConfig, baseline::BaselineHorizons},
    store::{SnapshotStore, sqlite_store::SqliteSnapshotStore},
    window::{MemoryWindowCache, WindowConfig},
};
use signal::{dedup::DedupEngine, store::sqlite_store::SqliteSignalStore};

use account::model::Channel;
use account::store::sqlite_store::SqliteAccountStore;
use delivery::{
    channel::ChannelRouter,
    digest::MemoryDigest,
    scheduler::DeliveryScheduler,
    store::sqlite_store::SqliteDeliveryStore,
    worker::SendAlertHandler,
};

struct Stores {
    snapshots: Arc<SqliteSnapshotStore>,
    signals: Arc<SqliteSignalStore>,
    accounts: Arc<SqliteAccountStore>,
    deliveries: Arc<SqliteDeliveryStore>,
}

/// Connect the pool and let every store create its own schema.
async fn init_stores(cfg: &AppConfig) -> anyhow::Result<Stores> {
    let db = Db::connect(&cfg.database_url).await?;

    let snapshots = Arc::new(SqliteSnapshotStore::from_pool(db.pool.clone()));
    snapshots.migrate().await?;

    let signals = Arc::new(SqliteSignalStore::from_pool(db.pool.clone()));
    signals.migrate().await?;

    let accounts = Arc::new(SqliteAccountStore::from_pool(db.pool.clone()));
    accounts.migrate().await?;

    let deliveries = Arc::new(SqliteDeliveryStore::from_pool(db.pool.clone()));
    deliveries.migrate().await?;

    Ok(Stores {
        snapshots,
        signals,
        accounts,
        deliveries,
    })
}

/// Discord goes out over its webhook; the remaining transports are owned
/// by provider integrations and use the log stand-in for now.
fn default_channel_router() -> anyhow::Result<ChannelRouter> {
    Ok(ChannelRouter::new()
        .with_sender(Channel::Email, Arc::new(LogSender::new(Channel::Email)))
        .with_sender(Channel::Sms, Arc::new(LogSender::new(Channel::Sms)))
        .with_sender(
            Channel::Telegram,
            Arc::new(LogSender::new(Channel::Telegram)),
        )
        .with_sender(Channel::Discord, Arc::new(DiscordWebhookSender::new()?)))
}

/// Poll the feed on a fixed cadence and hand each non-empty batch to the
/// market-data queue. Feed errors are transient by definition here; the
/// next tick simply tries again.
fn start_feed_loop(
    feed: Arc<dyn MarketFeed>,
    queue: Arc<MemoryJobQueue>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            let feed = Arc::clone(&feed);
            let queue = Arc::clone(&queue);

            async move {
                let batch = match feed.fetch_batch().await {
                    Ok(b) => b,
                    Err(e) => {
                        error!(error = %e, "feed poll failed");
                        return;
                    }
                };

                if batch.is_empty() {
                    return;
                }

                let payload = match serde_json::to_value(&batch) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "feed batch not serializable");
                        return;
                    }
                };

                if let Err(e) = queue
                    .enqueue(MARKET_DATA_QUEUE, INGEST_JOB, payload, JobOptions::default())
                    .await
                {
                    error!(error = %e, "market-data enqueue failed");
                }
            }
            .instrument(root_span("feed-batch", &TraceId::default()))
            .await;
        }
    })
}

fn start_retention_sweep(
    snapshots: Arc<SqliteSnapshotStore>,
    retention_ms: u64,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            let cutoff = now_ms().saturating_sub(retention_ms);
            match snapshots.prune_snapshots_before(cutoff).await {
                Ok(removed) if removed > 0 => {
                    info!(removed, cutoff, "old snapshots pruned");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "snapshot retention sweep failed"),
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    let cfg = AppConfig::from_env();
    info!(database_url = %cfg.database_url, feed = %cfg.feed_endpoint, "starting");

    let stores = init_stores(&cfg).await?;

    let windows = Arc::new(MemoryWindowCache::new(WindowConfig {
        capacity: cfg.window_capacity,
        ttl_ms: cfg.window_ttl_ms,
    }));

    let detector = Detector::new(DetectorConfig {
        min_samples: cfg.detector_min_samples,
        horizons: BaselineHorizons::default(),
        funding_threshold: cfg.funding_threshold,
        oi_min_price_delta: cfg.oi_min_price_delta,
        oi_min_oi_delta: cfg.oi_min_oi_delta,
    });

    let dedup = Arc::new(
        DedupEngine::new(stores.signals.clone(), cfg.signal_cooldown_ms, now_ms()).await?,
    );

    let queue = Arc::new(MemoryJobQueue::new(cfg.queue_capacity));
    let digest = Arc::new(MemoryDigest::new());

    let scheduler = Arc::new(DeliveryScheduler::new(
        stores.accounts.clone(),
        stores.deliveries.clone(),
        stores.signals.clone(),
        digest,
        queue.clone(),
    ));

    // Warm restart: rebuild window baselines before ingestion begins.
    let seeded = seed_windows(
        stores.snapshots.as_ref(),
        windows.as_ref(),
        cfg.window_capacity,
        now_ms(),
    )
    .await?;
    info!(seeded, "window baselines restored from snapshot store");

    let counters = Counters::default();
    let observer = Arc::new(CountingObserver::new(counters.clone()));
    let worker_cfg = WorkerConfig {
        concurrency: cfg.worker_concurrency,
        shutdown_grace: cfg.shutdown_grace,
        ..Default::default()
    };

    let market_pool = WorkerPool::consume(
        &queue,
        MARKET_DATA_QUEUE,
        Arc::new(MarketDataHandler::new(
            stores.snapshots.clone(),
            windows.clone(),
            detector,
            dedup,
            scheduler,
        )),
        worker_cfg.clone(),
        observer.clone(),
    )?;

    let alerts_pool = WorkerPool::consume(
        &queue,
        ALERTS_QUEUE,
        Arc::new(SendAlertHandler::new(
            stores.deliveries.clone(),
            default_channel_router()?,
        )),
        worker_cfg,
        observer,
    )?;

    let feed = Arc::new(HttpMarketFeed::new(
        cfg.feed_endpoint.clone(),
        cfg.min_quote_volume,
    )?);
    let feed_task = start_feed_loop(feed, queue.clone(), cfg.feed_poll_interval);
    let retention_task = start_retention_sweep(
        stores.snapshots.clone(),
        cfg.snapshot_retention_ms,
        cfg.retention_sweep_interval,
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; draining worker pools");

    feed_task.abort();
    retention_task.abort();
    market_pool.shutdown().await;
    alerts_pool.shutdown().await;

    info!("shutdown complete");
    Ok(())
}
