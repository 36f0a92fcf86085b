//! End-to-end pipeline tests: feed batch in, notifications out.
//!
//! Everything real except the channel transports (recording senders) and
//! the feed (ticks are handed straight to the market-data handler).

use std::sync::Arc;

use parking_lot::Mutex;
use sqlx::SqlitePool;

use account::model::{Budget, Channel, Subscription, Tier};
use account::store::AccountStore;
use account::store::sqlite_store::SqliteAccountStore;
use backend::pipeline::{INGEST_JOB, MarketDataHandler, seed_windows};
use common::time::now_ms;
use delivery::channel::{AlertPayload, ChannelRouter, ChannelSender, SendFailure};
use delivery::digest::MemoryDigest;
use delivery::model::DeliveryStatus;
use delivery::scheduler::DeliveryScheduler;
use delivery::store::DeliveryStore;
use delivery::store::sqlite_store::SqliteDeliveryStore;
use delivery::worker::SendAlertHandler;
use jobs::{ALERTS_QUEUE, Job, JobHandler, JobOptions, MARKET_DATA_QUEUE, MemoryJobQueue};
use market::detect::{Detector, DetectorConfig, SignalKind};
use market::store::sqlite_store::SqliteSnapshotStore;
use market::types::FeedTick;
use market::window::{MemoryWindowCache, WindowCache, WindowConfig};
use signal::dedup::DedupEngine;
use signal::store::SignalStore;
use signal::store::sqlite_store::SqliteSignalStore;

struct RecordingSender {
    sent: Mutex<Vec<(String, AlertPayload)>>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, recipient: &str, payload: &AlertPayload) -> Result<(), SendFailure> {
        self.sent.lock().push((recipient.to_string(), payload.clone()));
        Ok(())
    }
}

struct Pipeline {
    snapshots: Arc<SqliteSnapshotStore>,
    signals: Arc<SqliteSignalStore>,
    accounts: Arc<SqliteAccountStore>,
    deliveries: Arc<SqliteDeliveryStore>,
    windows: Arc<MemoryWindowCache>,
    queue: Arc<MemoryJobQueue>,
    digest: Arc<MemoryDigest>,
    ingest: MarketDataHandler,
    send_handler: SendAlertHandler,
    sender: Arc<RecordingSender>,
}

async fn pipeline(pool: SqlitePool) -> Pipeline {
    let snapshots = Arc::new(SqliteSnapshotStore::from_pool(pool.clone()));
    snapshots.migrate().await.expect("migrate snapshots");
    let signals = Arc::new(SqliteSignalStore::from_pool(pool.clone()));
    signals.migrate().await.expect("migrate signals");
    let accounts = Arc::new(SqliteAccountStore::from_pool(pool.clone()));
    accounts.migrate().await.expect("migrate accounts");
    let deliveries = Arc::new(SqliteDeliveryStore::from_pool(pool));
    deliveries.migrate().await.expect("migrate deliveries");

    let windows = Arc::new(MemoryWindowCache::new(WindowConfig::default()));
    let queue = Arc::new(MemoryJobQueue::new(64));
    let digest = Arc::new(MemoryDigest::new());

    let scheduler = Arc::new(DeliveryScheduler::new(
        accounts.clone(),
        deliveries.clone(),
        signals.clone(),
        digest.clone(),
        queue.clone(),
    ));

    let dedup = Arc::new(
        DedupEngine::new(signals.clone(), 300_000, now_ms())
            .await
            .expect("dedup engine"),
    );

    let ingest = MarketDataHandler::new(
        snapshots.clone(),
        windows.clone(),
        Detector::new(DetectorConfig::default()),
        dedup,
        scheduler,
    );

    let sender = RecordingSender::new();
    let router = ChannelRouter::new()
        .with_sender(Channel::Email, sender.clone())
        .with_sender(Channel::Telegram, sender.clone());
    let send_handler = SendAlertHandler::new(deliveries.clone(), router);

    Pipeline {
        snapshots,
        signals,
        accounts,
        deliveries,
        windows,
        queue,
        digest,
        ingest,
        send_handler,
        sender,
    }
}

fn subscription(user_id: i64, tier: Tier) -> Subscription {
    Subscription {
        user_id,
        account_id: 1,
        tier,
        active: true,
        credits_remaining: 100,
        email: Some(format!("user{user_id}@example.com")),
        sms_number: None,
        telegram_chat_id: if tier == Tier::Elite {
            Some(format!("chat-{user_id}"))
        } else {
            None
        },
        discord_webhook: None,
        symbols: None,
        min_strength: 2.0,
        minute_count: 0,
        minute_reset_ms: 0,
        day_count: 0,
        day_reset_ms: 0,
    }
}

async fn seed_users(accounts: &SqliteAccountStore, budget_cap: i64, budget_used: i64) {
    for (user_id, tier) in [(1, Tier::Free), (2, Tier::Pro), (3, Tier::Elite)] {
        accounts
            .upsert_subscription(&subscription(user_id, tier))
            .await
            .expect("seed subscription");
    }
    accounts
        .upsert_budget(&Budget {
            account_id: 1,
            monthly_cap: budget_cap,
            used: budget_used,
            resets_at_ms: u64::MAX,
        })
        .await
        .expect("seed budget");
}

fn tick(symbol: &str, seq: u64, volume: f64, funding: f64) -> FeedTick {
    FeedTick {
        symbol: symbol.to_string(),
        price: 1.0,
        volume_24h: volume,
        funding_rate: funding,
        open_interest: None,
        price_precision: Some(4),
        timestamp: 1_700_000_000_000 + seq * 180_000,
    }
}

fn ingest_job(ticks: &[FeedTick]) -> Job {
    Job::new(
        MARKET_DATA_QUEUE,
        INGEST_JOB,
        serde_json::to_value(ticks).expect("serialize ticks"),
        JobOptions::default(),
    )
}

/// Run every queued alert job through the send handler.
async fn drain_alerts(px: &Pipeline) -> usize {
    let mut rx = px.queue.take_receiver(ALERTS_QUEUE).expect("alerts receiver");
    let mut drained = 0;
    while let Ok(job) = rx.try_recv() {
        px.send_handler.handle(&job).await.expect("send job");
        drained += 1;
    }
    drained
}

/// Rolling mean 100_000, spike to 320_000: exactly one volume-spike-3x at
/// strength 3.2, delivered per tier-eligible (user, channel) pair.
#[sqlx::test]
async fn spike_fans_out_to_tier_eligible_channels(pool: SqlitePool) -> anyhow::Result<()> {
    let px = pipeline(pool).await;
    seed_users(&px.accounts, 1_000, 0).await;

    let mut ticks: Vec<FeedTick> = (0..5)
        .map(|i| tick("XYZUSDT", i, 100_000.0, 0.0001))
        .collect();
    ticks.push(tick("XYZUSDT", 5, 320_000.0, 0.0001));

    let summary = px.ingest.handle(&ingest_job(&ticks)).await.expect("ingest");
    assert_eq!(summary.processed, 6);
    assert_eq!(summary.failed_items, 0);

    // Exactly one signal: the 3x tier, never 2x alongside it. Funding at
    // 0.01% stays under the 0.03% threshold.
    let active = px.signals.load_active(now_ms()).await?;
    assert_eq!(active.len(), 1);
    let sig = &active[0];
    assert_eq!(sig.kind, SignalKind::VolumeSpike3x);
    assert!((sig.strength - 3.2).abs() < 1e-9);

    assert_eq!(drain_alerts(&px).await, 3);

    let records = px.deliveries.for_signal(sig.id).await?;
    let mut pairs: Vec<(i64, Channel)> = records.iter().map(|r| (r.user_id, r.channel)).collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            (2, Channel::Email),
            (3, Channel::Email),
            (3, Channel::Telegram)
        ]
    );
    assert!(records.iter().all(|r| r.status == DeliveryStatus::Sent));

    // Free-tier user 1 received nothing on any channel.
    assert!(records.iter().all(|r| r.user_id != 1));
    assert_eq!(px.sender.sent.lock().len(), 3);

    // Nobody was over quota, so no digest entries accumulated.
    for user_id in [1, 2, 3] {
        assert_eq!(px.digest.pending(user_id), 0);
    }

    // The full batch landed in the window, bounded by capacity.
    let window = px.windows.read("XYZUSDT", now_ms()).await?;
    assert_eq!(window.len(), 6);

    Ok(())
}

/// Replaying the same batch is a no-op end to end: duplicate snapshots
/// are skipped and no second signal is created.
#[sqlx::test]
async fn replayed_batch_is_idempotent(pool: SqlitePool) -> anyhow::Result<()> {
    let px = pipeline(pool).await;
    seed_users(&px.accounts, 1_000, 0).await;

    let mut ticks: Vec<FeedTick> = (0..5)
        .map(|i| tick("XYZUSDT", i, 100_000.0, 0.0))
        .collect();
    ticks.push(tick("XYZUSDT", 5, 320_000.0, 0.0));

    px.ingest.handle(&ingest_job(&ticks)).await.expect("ingest");
    let summary = px.ingest.handle(&ingest_job(&ticks)).await.expect("replay");
    assert_eq!(summary.processed, 6);

    let active = px.signals.load_active(now_ms()).await?;
    assert_eq!(active.len(), 1, "replay must not create a second signal");

    let records = px.deliveries.for_signal(active[0].id).await?;
    assert_eq!(records.len(), 3, "replay must not re-dispatch");

    Ok(())
}

/// A second spike inside the cooldown is suppressed and extends the
/// existing signal's deadline instead of creating a new one.
#[sqlx::test]
async fn repeat_spike_within_cooldown_is_suppressed(pool: SqlitePool) -> anyhow::Result<()> {
    let px = pipeline(pool).await;
    seed_users(&px.accounts, 1_000, 0).await;

    let mut ticks: Vec<FeedTick> = (0..5)
        .map(|i| tick("XYZUSDT", i, 100_000.0, 0.0))
        .collect();
    ticks.push(tick("XYZUSDT", 5, 320_000.0, 0.0));
    px.ingest.handle(&ingest_job(&ticks)).await.expect("ingest");

    let before = px.signals.load_active(now_ms()).await?;
    assert_eq!(before.len(), 1);
    let first_deadline = before[0].cooldown_until_ms;

    // Another 3x-tier spike right away. The first spike raised the
    // rolling mean to ~136.7k, so 450k still lands in the 3x tier.
    let repeat = tick("XYZUSDT", 6, 450_000.0, 0.0);
    px.ingest.handle(&ingest_job(&[repeat])).await.expect("repeat");

    let after = px.signals.load_active(now_ms()).await?;
    assert_eq!(after.len(), 1, "suppressed repeat must not add a signal");
    assert_eq!(after[0].id, before[0].id);
    assert!(after[0].cooldown_until_ms >= first_deadline);

    let records = px.deliveries.for_signal(after[0].id).await?;
    assert_eq!(records.len(), 3, "suppressed repeat must not re-dispatch");

    Ok(())
}

/// Budget.used == Budget.cap: every authorize is a terminal deny no
/// matter how many credits the individual users hold.
#[sqlx::test]
async fn exhausted_budget_blocks_the_whole_account(pool: SqlitePool) -> anyhow::Result<()> {
    let px = pipeline(pool).await;
    seed_users(&px.accounts, 10, 10).await;

    let mut ticks: Vec<FeedTick> = (0..5)
        .map(|i| tick("XYZUSDT", i, 100_000.0, 0.0))
        .collect();
    ticks.push(tick("XYZUSDT", 5, 320_000.0, 0.0));
    px.ingest.handle(&ingest_job(&ticks)).await.expect("ingest");

    let active = px.signals.load_active(now_ms()).await?;
    assert_eq!(active.len(), 1);

    let records = px.deliveries.for_signal(active[0].id).await?;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| {
        r.status == DeliveryStatus::Failed
            && r.last_error.as_deref() == Some("budget-exhausted")
    }));

    assert_eq!(drain_alerts(&px).await, 0);
    assert_eq!(px.sender.sent.lock().len(), 0);

    Ok(())
}

/// Window seeding restores baselines from the snapshot store, so the very
/// first post-restart tick can already fire.
#[sqlx::test]
async fn restart_seeding_keeps_baselines_warm(pool: SqlitePool) -> anyhow::Result<()> {
    let px = pipeline(pool).await;
    seed_users(&px.accounts, 1_000, 0).await;

    // First life: quiet history only.
    let ticks: Vec<FeedTick> = (0..5)
        .map(|i| tick("XYZUSDT", i, 100_000.0, 0.0))
        .collect();
    px.ingest.handle(&ingest_job(&ticks)).await.expect("ingest");

    // Second life: fresh cache, rebuilt from the store.
    let fresh_windows = MemoryWindowCache::new(WindowConfig::default());
    let seeded = seed_windows(
        px.snapshots.as_ref(),
        &fresh_windows,
        20,
        now_ms(),
    )
    .await?;
    assert_eq!(seeded, 1);

    let history = fresh_windows.read("XYZUSDT", now_ms()).await?;
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].ts_ms, 1_700_000_000_000);

    Ok(())
}
