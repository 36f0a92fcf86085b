pub mod sqlite_store;

use crate::model::{Signal, SignalId};

#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert(&self, signal: &Signal) -> anyhow::Result<()>;

    /// Extend an existing signal's cooldown. The only mutation suppressed
    /// repeats ever produce.
    async fn extend_cooldown(&self, id: SignalId, cooldown_until_ms: u64) -> anyhow::Result<()>;

    /// Signals whose cooldown has not elapsed at `now_ms`; used to rebuild
    /// the dedup state after a restart.
    async fn load_active(&self, now_ms: u64) -> anyhow::Result<Vec<Signal>>;

    async fn mark_undelivered(&self, id: SignalId) -> anyhow::Result<()>;

    async fn fetch(&self, id: SignalId) -> anyhow::Result<Option<Signal>>;
}
