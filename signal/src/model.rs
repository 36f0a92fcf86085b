use market::detect::{SignalCandidate, SignalKind};
use serde::{Deserialize, Serialize};

pub type SignalId = uuid::Uuid;

/// A detected anomalous event, persisted for delivery and audit.
///
/// Signals are append-only: after creation the only mutations they ever
/// receive are cooldown extension (dedup engine) and the `undelivered`
/// audit flag (delivery scheduler, when fan-out could not be enqueued).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub symbol: String,
    pub kind: SignalKind,
    /// Rule-specific magnitude, e.g. ratio to the volume baseline.
    pub strength: f64,
    pub detected_at_ms: u64,
    pub cooldown_until_ms: u64,
    /// Set when delivery fan-out failed permanently; audit only.
    pub undelivered: bool,
}

impl Signal {
    pub fn from_candidate(candidate: &SignalCandidate, cooldown_until_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            symbol: candidate.symbol.clone(),
            kind: candidate.kind,
            strength: candidate.strength,
            detected_at_ms: candidate.ts_ms,
            cooldown_until_ms,
            undelivered: false,
        }
    }
}
