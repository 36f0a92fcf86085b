use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::DeliveryStore;
use crate::model::{DeliveryId, DeliveryRecord, DeliveryStatus};
use account::model::Channel;

pub struct SqliteDeliveryStore {
    pool: SqlitePool,
}

impl SqliteDeliveryStore {
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
            CREATE TABLE IF NOT EXISTS deliveries (
                id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                cost INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_ms INTEGER NOT NULL,
                updated_ms INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_deliveries_signal ON deliveries(signal_id);"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_record(r: &sqlx::sqlite::SqliteRow) -> anyhow::Result<DeliveryRecord> {
    let id_str: String = r.get("id");
    let signal_str: String = r.get("signal_id");
    let channel_str: String = r.get("channel");
    let status_str: String = r.get("status");

    Ok(DeliveryRecord {
        id: Uuid::parse_str(&id_str)?,
        signal_id: Uuid::parse_str(&signal_str)?,
        user_id: r.get("user_id"),
        channel: Channel::from_str(&channel_str)?,
        status: DeliveryStatus::from_str(&status_str)?,
        cost: r.get("cost"),
        attempts: r.get::<i64, _>("attempts") as u32,
        last_error: r.get("last_error"),
        created_ms: r.get::<i64, _>("created_ms") as u64,
        updated_ms: r.get::<i64, _>("updated_ms") as u64,
    })
}

#[async_trait]
impl DeliveryStore for SqliteDeliveryStore {
    async fn insert(&self, record: &DeliveryRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deliveries (
                id, signal_id, user_id, channel, status,
                cost, attempts, last_error, created_ms, updated_ms
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
        "#,
        )
        .bind(record.id.to_string())
        .bind(record.signal_id.to_string())
        .bind(record.user_id)
        .bind(record.channel.as_str())
        .bind(record.status.as_str())
        .bind(record.cost)
        .bind(record.attempts as i64)
        .bind(&record.last_error)
        .bind(record.created_ms as i64)
        .bind(record.updated_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: DeliveryId) -> anyhow::Result<Option<DeliveryRecord>> {
        let row = sqlx::query("SELECT * FROM deliveries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: DeliveryId,
        from: DeliveryStatus,
        to: DeliveryStatus,
        error: Option<&str>,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = ?, last_error = COALESCE(?, last_error), updated_ms = ?
            WHERE id = ? AND status = ?;
        "#,
        )
        .bind(to.as_str())
        .bind(error)
        .bind(now_ms as i64)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_attempt(&self, id: DeliveryId) -> anyhow::Result<()> {
        sqlx::query("UPDATE deliveries SET attempts = attempts + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn for_signal(&self, signal_id: Uuid) -> anyhow::Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query("SELECT * FROM deliveries WHERE signal_id = ? ORDER BY created_ms")
            .bind(signal_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(row_to_record(r)?);
        }
        Ok(out)
    }
}
