//! SQLite-backed signal log. Signals are retained indefinitely for
//! backtesting and audit; nothing here deletes rows.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::SignalStore;
use crate::model::{Signal, SignalId};
use market::detect::SignalKind;

pub struct SqliteSignalStore {
    pool: SqlitePool,
}

impl SqliteSignalStore {
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
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                strength REAL NOT NULL,
                detected_at_ms INTEGER NOT NULL,
                cooldown_until_ms INTEGER NOT NULL,
                undelivered INTEGER NOT NULL DEFAULT 0 CHECK (undelivered IN (0,1))
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_signals_symbol_kind ON signals(symbol, kind);"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_signal(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Signal> {
    let id_str: String = row.get("id");
    let kind_str: String = row.get("kind");

    Ok(Signal {
        id: uuid::Uuid::parse_str(&id_str)?,
        symbol: row.get("symbol"),
        kind: SignalKind::from_str(&kind_str)?,
        strength: row.get("strength"),
        detected_at_ms: row.get::<i64, _>("detected_at_ms") as u64,
        cooldown_until_ms: row.get::<i64, _>("cooldown_until_ms") as u64,
        undelivered: row.get::<i64, _>("undelivered") == 1,
    })
}

#[async_trait]
impl SignalStore for SqliteSignalStore {
    async fn insert(&self, signal: &Signal) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (id, symbol, kind, strength, detected_at_ms, cooldown_until_ms, undelivered)
            VALUES (?, ?, ?, ?, ?, ?, ?);
        "#,
        )
        .bind(signal.id.to_string())
        .bind(&signal.symbol)
        .bind(signal.kind.as_str())
        .bind(signal.strength)
        .bind(signal.detected_at_ms as i64)
        .bind(signal.cooldown_until_ms as i64)
        .bind(signal.undelivered as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn extend_cooldown(&self, id: SignalId, cooldown_until_ms: u64) -> anyhow::Result<()> {
        sqlx::query("UPDATE signals SET cooldown_until_ms = ? WHERE id = ?")
            .bind(cooldown_until_ms as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_active(&self, now_ms: u64) -> anyhow::Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, kind, strength, detected_at_ms, cooldown_until_ms, undelivered
            FROM signals
            WHERE cooldown_until_ms > ?;
        "#,
        )
        .bind(now_ms as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_signal(row) {
                Ok(s) => out.push(s),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the load
                    tracing::warn!(error = %e, "skipping malformed signal row");
                }
            }
        }

        Ok(out)
    }

    async fn mark_undelivered(&self, id: SignalId) -> anyhow::Result<()> {
        sqlx::query("UPDATE signals SET undelivered = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch(&self, id: SignalId) -> anyhow::Result<Option<Signal>> {
        let row = sqlx::query(
            r#"
            SELECT id, symbol, kind, strength, detected_at_ms, cooldown_until_ms, undelivered
            FROM signals
            WHERE id = ?;
        "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_signal(&r)?)),
            None => Ok(None),
        }
    }
}
