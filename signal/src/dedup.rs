//! Debounce/dedup engine.
//!
//! One state machine per (symbol, kind) key:
//!
//!   Idle   --candidate-->  Active   (signal accepted and persisted,
//!                                    cooldown_until = now + cooldown)
//!   Active --candidate-->  Active   (candidate suppressed)
//!   Active --cooldown elapsed--> Idle
//!
//! Suppression policy: SLIDING cooldown. A suppressed repeat extends the
//! existing signal's cooldown_until to now + cooldown, so a sustained
//! anomaly stays one signal for as long as it keeps re-firing. Suppressed
//! candidates leave no durable trace beyond that extension.
//!
//! The in-memory map is rebuilt from the signal store at startup so a
//! restart mid-cooldown cannot double-announce the same event.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{Signal, SignalId};
use crate::store::SignalStore;
use market::detect::{SignalCandidate, SignalKind};

pub const DEFAULT_COOLDOWN_MS: u64 = 300_000;

type DedupKey = (String, SignalKind);

#[derive(Debug, Clone, Copy)]
struct ActiveCooldown {
    signal_id: SignalId,
    cooldown_until_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    /// Fresh signal, persisted; forward to the delivery scheduler.
    Accepted(Signal),
    /// Repeat within cooldown, discarded; the prior signal's cooldown was
    /// extended to the returned deadline.
    Suppressed {
        signal_id: SignalId,
        cooldown_until_ms: u64,
    },
}

pub struct DedupEngine {
    cooldown_ms: u64,
    store: Arc<dyn SignalStore>,
    states: Mutex<HashMap<DedupKey, ActiveCooldown>>,
}

impl DedupEngine {
    /// Build the engine and rebuild cooldown state from signals whose
    /// cooldown has not yet elapsed.
    pub async fn new(
        store: Arc<dyn SignalStore>,
        cooldown_ms: u64,
        now_ms: u64,
    ) -> anyhow::Result<Self> {
        let mut states = HashMap::new();
        for signal in store.load_active(now_ms).await? {
            states.insert(
                (signal.symbol.clone(), signal.kind),
                ActiveCooldown {
                    signal_id: signal.id,
                    cooldown_until_ms: signal.cooldown_until_ms,
                },
            );
        }

        debug!(restored = states.len(), "dedup state rebuilt from store");

        Ok(Self {
            cooldown_ms,
            store,
            states: Mutex::new(states),
        })
    }

    /// Run one candidate through the state machine, persisting whatever
    /// the transition requires.
    pub async fn apply(
        &self,
        candidate: &SignalCandidate,
        now_ms: u64,
    ) -> anyhow::Result<DedupOutcome> {
        let key = (candidate.symbol.clone(), candidate.kind);
        let mut states = self.states.lock().await;

        if let Some(active) = states.get(&key) {
            if now_ms < active.cooldown_until_ms {
                // Sliding cooldown: the repeat pushes the deadline out.
                let extended = now_ms + self.cooldown_ms;
                let signal_id = active.signal_id;

                self.store.extend_cooldown(signal_id, extended).await?;
                states.insert(
                    key,
                    ActiveCooldown {
                        signal_id,
                        cooldown_until_ms: extended,
                    },
                );

                return Ok(DedupOutcome::Suppressed {
                    signal_id,
                    cooldown_until_ms: extended,
                });
            }
        }

        let signal = Signal::from_candidate(candidate, now_ms + self.cooldown_ms);
        self.store.insert(&signal).await?;
        states.insert(
            key,
            ActiveCooldown {
                signal_id: signal.id,
                cooldown_until_ms: signal.cooldown_until_ms,
            },
        );

        Ok(DedupOutcome::Accepted(signal))
    }
}
