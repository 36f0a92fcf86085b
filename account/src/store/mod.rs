pub mod sqlite_store;

use crate::model::{Budget, Subscription};

/// Which quota window a counter bump targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Minute,
    Day,
}

impl RateWindow {
    pub fn span_ms(&self) -> u64 {
        match self {
            RateWindow::Minute => 60_000,
            RateWindow::Day => 86_400_000,
        }
    }
}

/// Persistence seam for subscriptions and budgets.
///
/// The counter/credit/budget operations are single atomic
/// conditional updates: they check and mutate in one statement so that
/// concurrent authorizations for the same user or account can never both
/// succeed past the remaining allowance.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>>;

    async fn fetch_subscription(&self, user_id: i64) -> anyhow::Result<Option<Subscription>>;

    async fn upsert_subscription(&self, sub: &Subscription) -> anyhow::Result<()>;

    async fn fetch_budget(&self, account_id: i64) -> anyhow::Result<Option<Budget>>;

    async fn upsert_budget(&self, budget: &Budget) -> anyhow::Result<()>;

    /// Increment the user's counter for `window` if it sits under `limit`,
    /// lazily resetting the window when its deadline passed. Returns false
    /// when the counter is exhausted (the increment did not happen).
    async fn bump_rate_counter(
        &self,
        user_id: i64,
        window: RateWindow,
        limit: u32,
        now_ms: u64,
    ) -> anyhow::Result<bool>;

    /// Decrement-if-sufficient. Returns false when the balance would go
    /// negative (nothing was consumed).
    async fn try_consume_credits(&self, user_id: i64, cost: i64) -> anyhow::Result<bool>;

    /// Compensating update for a credit taken before a later check failed.
    async fn refund_credits(&self, user_id: i64, amount: i64) -> anyhow::Result<()>;

    /// Increment-if-under-cap against the account budget, lazily rolling
    /// the month over when `now_ms` passed the reset deadline. Returns
    /// false when the cap would be exceeded.
    async fn try_consume_budget(
        &self,
        account_id: i64,
        cost: i64,
        next_reset_ms: u64,
        now_ms: u64,
    ) -> anyhow::Result<bool>;
}
