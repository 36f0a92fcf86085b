pub mod sqlite_store;

use crate::types::{Contract, MarketSnapshot};

/// Durable, deduplicated log of market observations. Source of truth for
/// backtesting and for reseeding window baselines after a restart.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or update a contract keyed by symbol.
    async fn upsert_contract(&self, contract: &Contract) -> anyhow::Result<()>;

    /// Insert one snapshot. Returns false when (symbol, ts_ms) already
    /// exists — the insert is a no-op, never an error.
    async fn insert_snapshot(&self, snapshot: &MarketSnapshot) -> anyhow::Result<bool>;

    /// The most recent `limit` snapshots for a symbol, oldest → newest.
    async fn load_recent(&self, symbol: &str, limit: usize)
    -> anyhow::Result<Vec<MarketSnapshot>>;

    /// Symbols of all active contracts.
    async fn active_symbols(&self) -> anyhow::Result<Vec<String>>;

    /// Delete snapshots older than `ts_ms`; returns rows removed.
    async fn prune_snapshots_before(&self, ts_ms: u64) -> anyhow::Result<u64>;
}
