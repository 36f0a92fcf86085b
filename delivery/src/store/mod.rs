pub mod sqlite_store;

use uuid::Uuid;

use crate::model::{DeliveryId, DeliveryRecord, DeliveryStatus};

#[async_trait::async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert(&self, record: &DeliveryRecord) -> anyhow::Result<()>;

    async fn fetch(&self, id: DeliveryId) -> anyhow::Result<Option<DeliveryRecord>>;

    /// Compare-and-set status transition. Returns false when the record
    /// was not in `from` (someone else already moved it); the caller must
    /// treat that as "not mine to finish".
    async fn transition(
        &self,
        id: DeliveryId,
        from: DeliveryStatus,
        to: DeliveryStatus,
        error: Option<&str>,
        now_ms: u64,
    ) -> anyhow::Result<bool>;

    /// Bump the attempt counter for one send execution.
    async fn record_attempt(&self, id: DeliveryId) -> anyhow::Result<()>;

    async fn for_signal(&self, signal_id: Uuid) -> anyhow::Result<Vec<DeliveryRecord>>;
}
