//! Digest fallback.
//!
//! When a user is over quota, signals are deferred into a per-user batch
//! instead of dropped. Batch assembly cadence and transport belong to an
//! external digest collaborator; this module only accumulates entries and
//! exposes a drain, which is all the delivery scheduler needs.

use std::collections::HashMap;

use parking_lot::Mutex;

use market::detect::SignalKind;
use signal::model::Signal;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct DigestEntry {
    pub signal_id: Uuid,
    pub symbol: String,
    pub kind: SignalKind,
    pub strength: f64,
    pub queued_ms: u64,
}

impl DigestEntry {
    pub fn from_signal(signal: &Signal, queued_ms: u64) -> Self {
        Self {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            kind: signal.kind,
            strength: signal.strength,
            queued_ms,
        }
    }
}

#[async_trait::async_trait]
pub trait DigestSink: Send + Sync {
    async fn append(&self, user_id: i64, entry: DigestEntry) -> anyhow::Result<()>;
}

/// In-memory per-user batcher.
#[derive(Default)]
pub struct MemoryDigest {
    batches: Mutex<HashMap<i64, Vec<DigestEntry>>>,
}

impl MemoryDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take and clear the pending batch for a user.
    pub fn drain(&self, user_id: i64) -> Vec<DigestEntry> {
        self.batches.lock().remove(&user_id).unwrap_or_default()
    }

    pub fn pending(&self, user_id: i64) -> usize {
        self.batches.lock().get(&user_id).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl DigestSink for MemoryDigest {
    async fn append(&self, user_id: i64, entry: DigestEntry) -> anyhow::Result<()> {
        self.batches.lock().entry(user_id).or_default().push(entry);
        Ok(())
    }
}
