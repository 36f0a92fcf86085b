//! SQLite-backed account store.
//!
//! Quota counters, credit balances and budget usage all live in the
//! database rather than in process memory, so multiple worker instances
//! observe one consistent ledger. Every check-and-mutate is a single
//! conditional UPDATE whose rows-affected count decides the outcome.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{AccountStore, RateWindow};
use crate::model::{Budget, Subscription, Tier};

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(path: &str) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(path).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL,
                tier TEXT NOT NULL,
                active INTEGER NOT NULL CHECK (active IN (0,1)),
                credits_remaining INTEGER NOT NULL,

                email TEXT,
                sms_number TEXT,
                telegram_chat_id TEXT,
                discord_webhook TEXT,

                symbols_json TEXT,
                min_strength REAL NOT NULL,

                minute_count INTEGER NOT NULL DEFAULT 0,
                minute_reset_ms INTEGER NOT NULL DEFAULT 0,
                day_count INTEGER NOT NULL DEFAULT 0,
                day_reset_ms INTEGER NOT NULL DEFAULT 0
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS budgets (
                account_id INTEGER PRIMARY KEY,
                monthly_cap INTEGER NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                resets_at_ms INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_subscriptions_account ON subscriptions(account_id);"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_subscription(r: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Subscription> {
    let tier_str: String = r.get("tier");
    let symbols_json: Option<String> = r.get("symbols_json");
    let symbols = match symbols_json {
        Some(json) => Some(serde_json::from_str::<Vec<String>>(&json)?),
        None => None,
    };

    Ok(Subscription {
        user_id: r.get("user_id"),
        account_id: r.get("account_id"),
        tier: Tier::from_str(&tier_str)?,
        active: r.get::<i64, _>("active") == 1,
        credits_remaining: r.get("credits_remaining"),
        email: r.get("email"),
        sms_number: r.get("sms_number"),
        telegram_chat_id: r.get("telegram_chat_id"),
        discord_webhook: r.get("discord_webhook"),
        symbols,
        min_strength: r.get("min_strength"),
        minute_count: r.get("minute_count"),
        minute_reset_ms: r.get::<i64, _>("minute_reset_ms") as u64,
        day_count: r.get("day_count"),
        day_reset_ms: r.get::<i64, _>("day_reset_ms") as u64,
    })
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    user_id, account_id, tier, active, credits_remaining,
    email, sms_number, telegram_chat_id, discord_webhook,
    symbols_json, min_strength,
    minute_count, minute_reset_ms, day_count, day_reset_ms
"#;

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE active = 1");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            match row_to_subscription(r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the batch
                    tracing::warn!(error = %e, "skipping malformed subscription row");
                }
            }
        }

        Ok(out)
    }

    async fn fetch_subscription(&self, user_id: i64) -> anyhow::Result<Option<Subscription>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = ?");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_subscription(&r)?)),
            None => Ok(None),
        }
    }

    async fn upsert_subscription(&self, sub: &Subscription) -> anyhow::Result<()> {
        let symbols_json = match &sub.symbols {
            Some(list) => Some(serde_json::to_string(list)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                user_id, account_id, tier, active, credits_remaining,
                email, sms_number, telegram_chat_id, discord_webhook,
                symbols_json, min_strength,
                minute_count, minute_reset_ms, day_count, day_reset_ms
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                account_id = excluded.account_id,
                tier = excluded.tier,
                active = excluded.active,
                credits_remaining = excluded.credits_remaining,
                email = excluded.email,
                sms_number = excluded.sms_number,
                telegram_chat_id = excluded.telegram_chat_id,
                discord_webhook = excluded.discord_webhook,
                symbols_json = excluded.symbols_json,
                min_strength = excluded.min_strength,
                minute_count = excluded.minute_count,
                minute_reset_ms = excluded.minute_reset_ms,
                day_count = excluded.day_count,
                day_reset_ms = excluded.day_reset_ms;
        "#,
        )
        .bind(sub.user_id)
        .bind(sub.account_id)
        .bind(sub.tier.as_str())
        .bind(sub.active as i64)
        .bind(sub.credits_remaining)
        .bind(&sub.email)
        .bind(&sub.sms_number)
        .bind(&sub.telegram_chat_id)
        .bind(&sub.discord_webhook)
        .bind(symbols_json)
        .bind(sub.min_strength)
        .bind(sub.minute_count)
        .bind(sub.minute_reset_ms as i64)
        .bind(sub.day_count)
        .bind(sub.day_reset_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_budget(&self, account_id: i64) -> anyhow::Result<Option<Budget>> {
        let row = sqlx::query(
            "SELECT account_id, monthly_cap, used, resets_at_ms FROM budgets WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Budget {
            account_id: r.get("account_id"),
            monthly_cap: r.get("monthly_cap"),
            used: r.get("used"),
            resets_at_ms: r.get::<i64, _>("resets_at_ms") as u64,
        }))
    }

    async fn upsert_budget(&self, budget: &Budget) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO budgets (account_id, monthly_cap, used, resets_at_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                monthly_cap = excluded.monthly_cap,
                used = excluded.used,
                resets_at_ms = excluded.resets_at_ms;
        "#,
        )
        .bind(budget.account_id)
        .bind(budget.monthly_cap)
        .bind(budget.used)
        .bind(budget.resets_at_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bump_rate_counter(
        &self,
        user_id: i64,
        window: RateWindow,
        limit: u32,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let (count_col, reset_col) = match window {
            RateWindow::Minute => ("minute_count", "minute_reset_ms"),
            RateWindow::Day => ("day_count", "day_reset_ms"),
        };

        // Lazy window reset. A no-op while the window is still open.
        let reset_sql = format!(
            "UPDATE subscriptions SET {count_col} = 0, {reset_col} = ? WHERE user_id = ? AND {reset_col} <= ?"
        );
        sqlx::query(&reset_sql)
            .bind((now_ms + window.span_ms()) as i64)
            .bind(user_id)
            .bind(now_ms as i64)
            .execute(&self.pool)
            .await?;

        let bump_sql = format!(
            "UPDATE subscriptions SET {count_col} = {count_col} + 1 WHERE user_id = ? AND {count_col} < ?"
        );
        let result = sqlx::query(&bump_sql)
            .bind(user_id)
            .bind(limit as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_consume_credits(&self, user_id: i64, cost: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET credits_remaining = credits_remaining - ?
            WHERE user_id = ? AND credits_remaining >= ?;
        "#,
        )
        .bind(cost)
        .bind(user_id)
        .bind(cost)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn refund_credits(&self, user_id: i64, amount: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE subscriptions SET credits_remaining = credits_remaining + ? WHERE user_id = ?")
            .bind(amount)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn try_consume_budget(
        &self,
        account_id: i64,
        cost: i64,
        next_reset_ms: u64,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        // Lazy monthly rollover.
        sqlx::query(
            "UPDATE budgets SET used = 0, resets_at_ms = ? WHERE account_id = ? AND resets_at_ms <= ?",
        )
        .bind(next_reset_ms as i64)
        .bind(account_id)
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE budgets
            SET used = used + ?
            WHERE account_id = ? AND used + ? <= monthly_cap;
        "#,
        )
        .bind(cost)
        .bind(account_id)
        .bind(cost)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
