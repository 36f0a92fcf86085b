//! Delivery scheduler.
//!
//! Turns one accepted signal into zero or more delivery jobs:
//!   1. Load subscriptions and keep those interested in the signal
//!      (symbol filter + minimum strength).
//!   2. Intersect each user's configured channels with the tier-eligible
//!      set.
//!   3. Authorize every (user, channel) pair through the credit/budget
//!      ledger.
//!   4. Allowed → DeliveryRecord(queued) + one job on the alerts queue.
//!      Rate-limited → DeliveryRecord(digested) + digest batch append.
//!      Terminal deny → DeliveryRecord(failed, reason), no job.
//!
//! Enqueue failures are retried a bounded number of times; when the queue
//! stays unavailable the record flips to failed and the signal itself is
//! flagged undelivered for audit.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, field, instrument, warn};
use uuid::Uuid;

use account::ledger::CreditLedger;
use account::model::{Channel, Subscription};
use account::store::AccountStore;
use common::logger::warn_if_slow;
use jobs::{ALERTS_QUEUE, JobOptions, JobQueue};
use signal::model::Signal;
use signal::store::SignalStore;

use crate::channel::AlertPayload;
use crate::digest::{DigestEntry, DigestSink};
use crate::model::{DeliveryRecord, DeliveryStatus};
use crate::store::DeliveryStore;

pub const SEND_ALERT_JOB: &str = "send-alert";
const ENQUEUE_ATTEMPTS: u32 = 3;

/// Payload of one `send-alert` job: everything the sender needs, resolved
/// at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAlertJob {
    pub delivery_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub payload: AlertPayload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub enqueued: usize,
    pub digested: usize,
    pub denied: usize,
    pub undeliverable: usize,
}

pub struct DeliveryScheduler {
    accounts: Arc<dyn AccountStore>,
    ledger: CreditLedger,
    deliveries: Arc<dyn DeliveryStore>,
    signals: Arc<dyn SignalStore>,
    digest: Arc<dyn DigestSink>,
    queue: Arc<dyn JobQueue>,
}

impl DeliveryScheduler {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        deliveries: Arc<dyn DeliveryStore>,
        signals: Arc<dyn SignalStore>,
        digest: Arc<dyn DigestSink>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let ledger = CreditLedger::new(Arc::clone(&accounts));
        Self {
            accounts,
            ledger,
            deliveries,
            signals,
            digest,
            queue,
        }
    }

    #[instrument(
        skip(self, signal),
        target = "delivery",
        fields(signal_id = %signal.id, symbol = %signal.symbol, kind = %signal.kind, enqueued = field::Empty)
    )]
    pub async fn dispatch(&self, signal: &Signal, now_ms: u64) -> anyhow::Result<DispatchSummary> {
        let subs = warn_if_slow("load_subscriptions", Duration::from_millis(100), async {
            self.accounts.active_subscriptions().await
        })
        .await?;

        let mut summary = DispatchSummary::default();

        for sub in &subs {
            if !sub.wants(&signal.symbol, signal.strength) {
                continue;
            }

            for channel in sub.eligible_channels() {
                self.dispatch_one(signal, sub, channel, now_ms, &mut summary)
                    .await?;
            }
        }

        tracing::Span::current().record("enqueued", summary.enqueued);
        debug!(
            digested = summary.digested,
            denied = summary.denied,
            undeliverable = summary.undeliverable,
            "signal fan-out complete"
        );

        Ok(summary)
    }

    async fn dispatch_one(
        &self,
        signal: &Signal,
        sub: &Subscription,
        channel: Channel,
        now_ms: u64,
        summary: &mut DispatchSummary,
    ) -> anyhow::Result<()> {
        let auth = self.ledger.authorize(sub, channel, now_ms).await?;

        if let account::ledger::Authorization::Allowed { cost } = auth {
            let record = DeliveryRecord::queued(signal, sub, channel, cost, now_ms);
            self.deliveries.insert(&record).await?;

            // eligible_channels() only yields configured channels.
            let Some(recipient) = sub.recipient(channel) else {
                return Ok(());
            };

            let job = SendAlertJob {
                delivery_id: record.id,
                channel,
                recipient: recipient.to_string(),
                payload: AlertPayload::from_signal(signal),
            };

            if self.enqueue_with_retry(&job).await {
                summary.enqueued += 1;
            } else {
                self.deliveries
                    .transition(
                        record.id,
                        DeliveryStatus::Queued,
                        DeliveryStatus::Failed,
                        Some("alerts queue unavailable"),
                        now_ms,
                    )
                    .await?;
                self.signals.mark_undelivered(signal.id).await?;
                summary.undeliverable += 1;
            }
        } else if auth.digest_fallback() {
            let record = DeliveryRecord::digested(signal, sub, channel, now_ms);
            self.deliveries.insert(&record).await?;
            self.digest
                .append(sub.user_id, DigestEntry::from_signal(signal, now_ms))
                .await?;
            summary.digested += 1;
        } else {
            let reason = auth.deny_reason().unwrap_or("denied");
            let record = DeliveryRecord::failed(signal, sub, channel, reason, now_ms);
            self.deliveries.insert(&record).await?;
            summary.denied += 1;
        }

        Ok(())
    }

    async fn enqueue_with_retry(&self, job: &SendAlertJob) -> bool {
        let payload = match serde_json::to_value(job) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "send-alert job not serializable");
                return false;
            }
        };

        for attempt in 1..=ENQUEUE_ATTEMPTS {
            match self
                .queue
                .enqueue(ALERTS_QUEUE, SEND_ALERT_JOB, payload.clone(), JobOptions::default())
                .await
            {
                Ok(_) => return true,
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        "enqueue to alerts queue failed"
                    );
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::MemoryDigest;
    use account::model::{Budget, Tier};
    use account::store::RateWindow;
    use market::detect::SignalKind;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MockAccountStore {
        subs: Vec<Subscription>,
        credits: Mutex<HashMap<i64, i64>>,
        budget: Mutex<Budget>,
        minute_counts: Mutex<HashMap<i64, i64>>,
    }

    impl MockAccountStore {
        fn new(subs: Vec<Subscription>, budget_cap: i64) -> Self {
            let credits = subs.iter().map(|s| (s.user_id, s.credits_remaining)).collect();
            Self {
                subs,
                credits: Mutex::new(credits),
                budget: Mutex::new(Budget {
                    account_id: 1,
                    monthly_cap: budget_cap,
                    used: 0,
                    resets_at_ms: u64::MAX,
                }),
                minute_counts: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl AccountStore for MockAccountStore {
        async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
            Ok(self.subs.iter().filter(|s| s.active).cloned().collect())
        }

        async fn fetch_subscription(&self, user_id: i64) -> anyhow::Result<Option<Subscription>> {
            Ok(self.subs.iter().find(|s| s.user_id == user_id).cloned())
        }

        async fn upsert_subscription(&self, _sub: &Subscription) -> anyhow::Result<()> {
            Ok(())
        }

        async fn fetch_budget(&self, _account_id: i64) -> anyhow::Result<Option<Budget>> {
            Ok(Some(self.budget.lock().clone()))
        }

        async fn upsert_budget(&self, _budget: &Budget) -> anyhow::Result<()> {
            Ok(())
        }

        async fn bump_rate_counter(
            &self,
            user_id: i64,
            window: RateWindow,
            limit: u32,
            _now_ms: u64,
        ) -> anyhow::Result<bool> {
            if window == RateWindow::Day {
                return Ok(true);
            }
            let mut guard = self.minute_counts.lock();
            let count = guard.entry(user_id).or_insert(0);
            if *count >= limit as i64 {
                return Ok(false);
            }
            *count += 1;
            Ok(true)
        }

        async fn try_consume_credits(&self, user_id: i64, cost: i64) -> anyhow::Result<bool> {
            let mut guard = self.credits.lock();
            let balance = guard.entry(user_id).or_insert(0);
            if *balance < cost {
                return Ok(false);
            }
            *balance -= cost;
            Ok(true)
        }

        async fn refund_credits(&self, user_id: i64, amount: i64) -> anyhow::Result<()> {
            *self.credits.lock().entry(user_id).or_insert(0) += amount;
            Ok(())
        }

        async fn try_consume_budget(
            &self,
            _account_id: i64,
            cost: i64,
            _next_reset_ms: u64,
            _now_ms: u64,
        ) -> anyhow::Result<bool> {
            let mut budget = self.budget.lock();
            if budget.used + cost > budget.monthly_cap {
                return Ok(false);
            }
            budget.used += cost;
            Ok(true)
        }
    }

    #[derive(Default)]
    struct MockDeliveryStore {
        records: Mutex<Vec<DeliveryRecord>>,
    }

    #[async_trait::async_trait]
    impl DeliveryStore for MockDeliveryStore {
        async fn insert(&self, record: &DeliveryRecord) -> anyhow::Result<()> {
            self.records.lock().push(record.clone());
            Ok(())
        }

        async fn fetch(&self, id: Uuid) -> anyhow::Result<Option<DeliveryRecord>> {
            Ok(self.records.lock().iter().find(|r| r.id == id).cloned())
        }

        async fn transition(
            &self,
            id: Uuid,
            from: DeliveryStatus,
            to: DeliveryStatus,
            error: Option<&str>,
            now_ms: u64,
        ) -> anyhow::Result<bool> {
            let mut records = self.records.lock();
            let Some(record) = records.iter_mut().find(|r| r.id == id && r.status == from) else {
                return Ok(false);
            };
            record.status = to;
            if let Some(e) = error {
                record.last_error = Some(e.to_string());
            }
            record.updated_ms = now_ms;
            Ok(true)
        }

        async fn record_attempt(&self, id: Uuid) -> anyhow::Result<()> {
            if let Some(r) = self.records.lock().iter_mut().find(|r| r.id == id) {
                r.attempts += 1;
            }
            Ok(())
        }

        async fn for_signal(&self, signal_id: Uuid) -> anyhow::Result<Vec<DeliveryRecord>> {
            Ok(self
                .records
                .lock()
                .iter()
                .filter(|r| r.signal_id == signal_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MockSignalStore {
        undelivered: Mutex<Vec<Uuid>>,
    }

    #[async_trait::async_trait]
    impl SignalStore for MockSignalStore {
        async fn insert(&self, _signal: &Signal) -> anyhow::Result<()> {
            Ok(())
        }

        async fn extend_cooldown(&self, _id: Uuid, _until: u64) -> anyhow::Result<()> {
            Ok(())
        }

        async fn load_active(&self, _now_ms: u64) -> anyhow::Result<Vec<Signal>> {
            Ok(vec![])
        }

        async fn mark_undelivered(&self, id: Uuid) -> anyhow::Result<()> {
            self.undelivered.lock().push(id);
            Ok(())
        }

        async fn fetch(&self, _id: Uuid) -> anyhow::Result<Option<Signal>> {
            Ok(None)
        }
    }

    /// Queue that fails every enqueue; for the undeliverable path.
    struct ClosedQueue;

    #[async_trait::async_trait]
    impl JobQueue for ClosedQueue {
        async fn enqueue(
            &self,
            queue: &str,
            _name: &str,
            _payload: serde_json::Value,
            _opts: JobOptions,
        ) -> anyhow::Result<Uuid> {
            Err(anyhow::anyhow!("queue '{}' is closed", queue))
        }
    }

    fn subscription(user_id: i64, tier: Tier, credits: i64) -> Subscription {
        Subscription {
            user_id,
            account_id: 1,
            tier,
            active: true,
            credits_remaining: credits,
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

    fn spike_signal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: "XYZUSDT".to_string(),
            kind: SignalKind::VolumeSpike3x,
            strength: 3.2,
            detected_at_ms: 1_000,
            cooldown_until_ms: 301_000,
            undelivered: false,
        }
    }

    struct Fixture {
        scheduler: DeliveryScheduler,
        deliveries: Arc<MockDeliveryStore>,
        signals: Arc<MockSignalStore>,
        digest: Arc<MemoryDigest>,
        queue: Arc<jobs::MemoryJobQueue>,
    }

    fn fixture(subs: Vec<Subscription>, budget_cap: i64) -> Fixture {
        let accounts = Arc::new(MockAccountStore::new(subs, budget_cap));
        let deliveries = Arc::new(MockDeliveryStore::default());
        let signals = Arc::new(MockSignalStore::default());
        let digest = Arc::new(MemoryDigest::new());
        let queue = Arc::new(jobs::MemoryJobQueue::new(64));

        let scheduler = DeliveryScheduler::new(
            accounts,
            deliveries.clone(),
            signals.clone(),
            digest.clone(),
            queue.clone(),
        );

        Fixture {
            scheduler,
            deliveries,
            signals,
            digest,
            queue,
        }
    }

    #[tokio::test]
    async fn fan_out_respects_tier_channel_eligibility() {
        // free: nothing; pro: email only; elite: email + telegram.
        let fx = fixture(
            vec![
                subscription(1, Tier::Free, 100),
                subscription(2, Tier::Pro, 100),
                subscription(3, Tier::Elite, 100),
            ],
            1_000,
        );

        let signal = spike_signal();
        let summary = fx.scheduler.dispatch(&signal, 1_000).await.unwrap();

        assert_eq!(summary.enqueued, 3);
        assert_eq!(summary.denied, 0);

        let records = fx.deliveries.for_signal(signal.id).await.unwrap();
        let mut pairs: Vec<(i64, Channel)> =
            records.iter().map(|r| (r.user_id, r.channel)).collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                (2, Channel::Email),
                (3, Channel::Email),
                (3, Channel::Telegram)
            ]
        );
        assert!(records.iter().all(|r| r.status == DeliveryStatus::Queued));
        assert!(fx.signals.undelivered.lock().is_empty());
    }

    #[tokio::test]
    async fn weak_signal_is_filtered_by_min_strength() {
        let fx = fixture(vec![subscription(2, Tier::Pro, 100)], 1_000);

        let mut signal = spike_signal();
        signal.kind = SignalKind::VolumeSpike2x;
        signal.strength = 1.9; // below the user's 2.0 floor

        let summary = fx.scheduler.dispatch(&signal, 1_000).await.unwrap();
        assert_eq!(summary, DispatchSummary::default());
        assert!(fx.deliveries.for_signal(signal.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limited_user_gets_a_digest_entry() {
        let mut sub = subscription(2, Tier::Pro, 100);
        sub.minute_count = 0;
        let fx = fixture(vec![sub], 1_000);

        // Exhaust the pro per-minute quota (5).
        let signal = spike_signal();
        for _ in 0..5 {
            fx.scheduler.dispatch(&signal, 1_000).await.unwrap();
        }

        let summary = fx.scheduler.dispatch(&signal, 1_000).await.unwrap();
        assert_eq!(summary.digested, 1);
        assert_eq!(summary.enqueued, 0);

        assert_eq!(fx.digest.pending(2), 1);

        let records = fx.deliveries.for_signal(signal.id).await.unwrap();
        let digested: Vec<_> = records
            .iter()
            .filter(|r| r.status == DeliveryStatus::Digested)
            .collect();
        assert_eq!(digested.len(), 1);
        assert_eq!(digested[0].cost, 0);
    }

    #[tokio::test]
    async fn zero_credit_user_gets_a_failed_record_and_no_job() {
        let fx = fixture(vec![subscription(2, Tier::Pro, 0)], 1_000);

        let signal = spike_signal();
        let summary = fx.scheduler.dispatch(&signal, 1_000).await.unwrap();
        assert_eq!(summary.denied, 1);
        assert_eq!(summary.enqueued, 0);

        let records = fx.deliveries.for_signal(signal.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DeliveryStatus::Failed);
        assert_eq!(
            records[0].last_error.as_deref(),
            Some("insufficient-credits")
        );

        // No job landed on the alerts queue.
        let mut rx = fx.queue.take_receiver(ALERTS_QUEUE).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unavailable_queue_marks_the_signal_undelivered() {
        let accounts = Arc::new(MockAccountStore::new(
            vec![subscription(2, Tier::Pro, 100)],
            1_000,
        ));
        let deliveries = Arc::new(MockDeliveryStore::default());
        let signals = Arc::new(MockSignalStore::default());
        let digest = Arc::new(MemoryDigest::new());

        let scheduler = DeliveryScheduler::new(
            accounts,
            deliveries.clone(),
            signals.clone(),
            digest,
            Arc::new(ClosedQueue),
        );

        let signal = spike_signal();
        let summary = scheduler.dispatch(&signal, 1_000).await.unwrap();
        assert_eq!(summary.undeliverable, 1);

        let records = deliveries.for_signal(signal.id).await.unwrap();
        assert_eq!(records[0].status, DeliveryStatus::Failed);
        assert_eq!(signals.undelivered.lock().as_slice(), &[signal.id]);
    }

    #[tokio::test]
    async fn budget_cap_denies_every_user_of_the_account() {
        let fx = fixture(
            vec![
                subscription(2, Tier::Pro, 100),
                subscription(3, Tier::Elite, 100),
            ],
            0, // account budget already exhausted
        );

        let signal = spike_signal();
        let summary = fx.scheduler.dispatch(&signal, 1_000).await.unwrap();

        assert_eq!(summary.enqueued, 0);
        assert_eq!(summary.denied, 3);

        let records = fx.deliveries.for_signal(signal.id).await.unwrap();
        assert!(records.iter().all(|r| {
            r.status == DeliveryStatus::Failed
                && r.last_error.as_deref() == Some("budget-exhausted")
        }));
    }
}
