//! Historical window cache.
//!
//! Per-symbol bounded ring of recent samples, the raw material for baseline
//! computation. Entries live behind a TTL: a symbol that stops ticking goes
//! cold and its history is dropped wholesale, after which detection for that
//! symbol waits for the window to repopulate.
//!
//! The cache is addressed through the `WindowCache` trait so the in-memory
//! implementation can be swapped for an external key-value store; keys are
//! scoped as `historical:{symbol}` either way.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::WindowSample;

pub const DEFAULT_WINDOW_CAPACITY: usize = 20;
pub const DEFAULT_WINDOW_TTL_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    /// Maximum samples retained per symbol. Oldest evicted first.
    pub capacity: usize,
    /// Idle time after which a symbol's entire window expires.
    pub ttl_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            ttl_ms: DEFAULT_WINDOW_TTL_MS,
        }
    }
}

/// Outcome of recording one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Appended,
    /// Sample not newer than the newest retained sample; ignored so a
    /// retried or reordered job cannot corrupt the window.
    Stale,
}

#[async_trait]
pub trait WindowCache: Send + Sync {
    /// Append a sample, evicting the oldest past capacity and refreshing
    /// the entry TTL.
    async fn record(
        &self,
        symbol: &str,
        sample: WindowSample,
        now_ms: u64,
    ) -> anyhow::Result<RecordOutcome>;

    /// Current ordered sequence (oldest → newest), or empty when the symbol
    /// is absent or its entry expired.
    async fn read(&self, symbol: &str, now_ms: u64) -> anyhow::Result<Vec<WindowSample>>;
}

fn cache_key(symbol: &str) -> String {
    format!("historical:{symbol}")
}

struct SymbolWindow {
    samples: VecDeque<WindowSample>,
    expires_at_ms: u64,
}

impl SymbolWindow {
    fn push(&mut self, sample: WindowSample, capacity: usize) -> RecordOutcome {
        if let Some(newest) = self.samples.back() {
            if sample.ts_ms <= newest.ts_ms {
                return RecordOutcome::Stale;
            }
        }

        self.samples.push_back(sample);
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }

        RecordOutcome::Appended
    }
}

/// In-memory TTL cache keyed by `historical:{symbol}`.
pub struct MemoryWindowCache {
    cfg: WindowConfig,
    entries: Mutex<HashMap<String, SymbolWindow>>,
}

impl MemoryWindowCache {
    pub fn new(cfg: WindowConfig) -> Self {
        Self {
            cfg,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WindowCache for MemoryWindowCache {
    async fn record(
        &self,
        symbol: &str,
        sample: WindowSample,
        now_ms: u64,
    ) -> anyhow::Result<RecordOutcome> {
        let key = cache_key(symbol);
        let mut entries = self.entries.lock();

        let entry = entries.entry(key).or_insert_with(|| SymbolWindow {
            samples: VecDeque::new(),
            expires_at_ms: 0,
        });

        // An expired entry restarts from empty rather than resuming a
        // stale baseline.
        if entry.expires_at_ms != 0 && now_ms >= entry.expires_at_ms {
            entry.samples.clear();
        }

        let outcome = entry.push(sample, self.cfg.capacity);
        entry.expires_at_ms = now_ms + self.cfg.ttl_ms;

        Ok(outcome)
    }

    async fn read(&self, symbol: &str, now_ms: u64) -> anyhow::Result<Vec<WindowSample>> {
        let key = cache_key(symbol);
        let mut entries = self.entries.lock();

        let expired = match entries.get(&key) {
            None => return Ok(Vec::new()),
            Some(entry) => now_ms >= entry.expires_at_ms,
        };

        if expired {
            entries.remove(&key);
            return Ok(Vec::new());
        }

        Ok(entries
            .get(&key)
            .map(|e| e.samples.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts_ms: u64, volume: f64) -> WindowSample {
        WindowSample {
            ts_ms,
            price: 1.0,
            volume_24h: volume,
            funding_rate: 0.0,
            open_interest: None,
        }
    }

    fn small_cache() -> MemoryWindowCache {
        MemoryWindowCache::new(WindowConfig {
            capacity: 3,
            ttl_ms: 10_000,
        })
    }

    #[tokio::test]
    async fn read_of_unknown_symbol_is_empty() {
        let cache = small_cache();
        let out = cache.read("XYZUSDT", 0).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let cache = small_cache();

        for i in 0..5u64 {
            let out = cache
                .record("XYZUSDT", sample(i * 1_000, i as f64), i * 1_000)
                .await
                .unwrap();
            assert_eq!(out, RecordOutcome::Appended);
        }

        let window = cache.read("XYZUSDT", 4_000).await.unwrap();
        assert_eq!(window.len(), 3);
        let ts: Vec<u64> = window.iter().map(|s| s.ts_ms).collect();
        assert_eq!(ts, vec![2_000, 3_000, 4_000]);
    }

    #[tokio::test]
    async fn stale_sample_is_rejected() {
        let cache = small_cache();

        cache.record("XYZUSDT", sample(2_000, 1.0), 2_000).await.unwrap();
        let out = cache.record("XYZUSDT", sample(1_000, 2.0), 2_100).await.unwrap();
        assert_eq!(out, RecordOutcome::Stale);

        // Equal timestamp is a duplicate, also rejected.
        let out = cache.record("XYZUSDT", sample(2_000, 3.0), 2_200).await.unwrap();
        assert_eq!(out, RecordOutcome::Stale);

        let window = cache.read("XYZUSDT", 2_300).await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn entry_expires_after_ttl_of_inactivity() {
        let cache = small_cache();

        cache.record("XYZUSDT", sample(0, 1.0), 0).await.unwrap();
        cache.record("XYZUSDT", sample(1_000, 2.0), 1_000).await.unwrap();

        // Just inside the TTL the window survives.
        assert_eq!(cache.read("XYZUSDT", 10_999).await.unwrap().len(), 2);

        // At the deadline the entry is gone entirely.
        assert!(cache.read("XYZUSDT", 11_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_after_expiry_restarts_the_window() {
        let cache = small_cache();

        cache.record("XYZUSDT", sample(0, 1.0), 0).await.unwrap();

        // Well past the TTL: the old sample must not survive into the new
        // window.
        cache
            .record("XYZUSDT", sample(50_000, 2.0), 50_000)
            .await
            .unwrap();

        let window = cache.read("XYZUSDT", 50_100).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].ts_ms, 50_000);
    }

    #[tokio::test]
    async fn record_refreshes_ttl() {
        let cache = small_cache();

        cache.record("XYZUSDT", sample(0, 1.0), 0).await.unwrap();
        cache.record("XYZUSDT", sample(9_000, 2.0), 9_000).await.unwrap();

        // 0-based TTL would have expired at 10_000; the second record
        // pushed expiry to 19_000.
        assert_eq!(cache.read("XYZUSDT", 18_999).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn symbols_are_isolated() {
        let cache = small_cache();

        cache.record("AAAUSDT", sample(0, 1.0), 0).await.unwrap();
        cache.record("BBBUSDT", sample(0, 9.0), 0).await.unwrap();

        let a = cache.read("AAAUSDT", 100).await.unwrap();
        let b = cache.read("BBBUSDT", 100).await.unwrap();
        assert_eq!(a[0].volume_24h, 1.0);
        assert_eq!(b[0].volume_24h, 9.0);
    }
}
