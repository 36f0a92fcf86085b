//! SqliteSnapshotStore
//! --------------------
//! SQLite-backed implementation of the `SnapshotStore` trait. Owns the
//! `contracts` and `snapshots` tables:
//!
//!  - contracts are upserted by symbol as the feed reveals them
//!  - snapshots are append-only with a (symbol, ts_ms) primary key, so a
//!    replayed ingestion job re-inserting the same observation is a no-op
//!  - recent rows can be read back to reseed window baselines on restart

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::SnapshotStore;
use crate::types::{Contract, MarketSnapshot};

pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and ensure schema exists.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(path).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contracts (
                symbol TEXT PRIMARY KEY,
                price_precision INTEGER NOT NULL,
                active INTEGER NOT NULL CHECK (active IN (0,1))
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                symbol TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                price REAL NOT NULL,
                volume_24h REAL NOT NULL,
                funding_rate REAL NOT NULL,
                open_interest REAL,
                PRIMARY KEY (symbol, ts_ms)
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON snapshots(ts_ms);"#)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn upsert_contract(&self, contract: &Contract) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contracts (symbol, price_precision, active)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                price_precision = excluded.price_precision,
                active = excluded.active;
        "#,
        )
        .bind(&contract.symbol)
        .bind(contract.price_precision as i64)
        .bind(contract.active as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &MarketSnapshot) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (symbol, ts_ms, price, volume_24h, funding_rate, open_interest)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, ts_ms) DO NOTHING;
        "#,
        )
        .bind(&snapshot.symbol)
        .bind(snapshot.ts_ms as i64)
        .bind(snapshot.price)
        .bind(snapshot.volume_24h)
        .bind(snapshot.funding_rate)
        .bind(snapshot.open_interest)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_recent(
        &self,
        symbol: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<MarketSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, ts_ms, price, volume_24h, funding_rate, open_interest
            FROM snapshots
            WHERE symbol = ?
            ORDER BY ts_ms DESC
            LIMIT ?;
        "#,
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            out.push(MarketSnapshot {
                symbol: row.get::<String, _>("symbol"),
                ts_ms: row.get::<i64, _>("ts_ms") as u64,
                price: row.get("price"),
                volume_24h: row.get("volume_24h"),
                funding_rate: row.get("funding_rate"),
                open_interest: row.get("open_interest"),
            });
        }

        Ok(out)
    }

    async fn active_symbols(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT symbol FROM contracts WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|r| r.get("symbol")).collect())
    }

    async fn prune_snapshots_before(&self, ts_ms: u64) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM snapshots WHERE ts_ms < ?")
            .bind(ts_ms as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
