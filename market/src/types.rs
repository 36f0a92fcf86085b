use serde::{Deserialize, Serialize};

/// One tick as delivered by the feed collaborator.
///
/// The feed speaks camelCase JSON and is allowed to omit `openInterest`
/// (spot-only symbols) and `pricePrecision` (older feed versions).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTick {
    pub symbol: String,
    pub price: f64,
    #[serde(rename = "volume24h")]
    pub volume_24h: f64,
    pub funding_rate: f64,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub price_precision: Option<u32>,
    /// Epoch milliseconds assigned by the feed.
    pub timestamp: u64,
}

/// A tradable symbol. Created on first observation, updated in place as
/// precision or active status changes, never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub symbol: String,
    pub price_precision: u32,
    pub active: bool,
}

pub const DEFAULT_PRICE_PRECISION: u32 = 8;

impl Contract {
    pub fn from_tick(tick: &FeedTick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            price_precision: tick.price_precision.unwrap_or(DEFAULT_PRICE_PRECISION),
            active: true,
        }
    }
}

/// Immutable market observation. Unique per (symbol, ts_ms); re-inserting
/// the same key is a no-op at the store layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    pub volume_24h: f64,
    pub funding_rate: f64,
    pub open_interest: Option<f64>,
    pub ts_ms: u64,
}

impl MarketSnapshot {
    pub fn from_tick(tick: &FeedTick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            price: tick.price,
            volume_24h: tick.volume_24h,
            funding_rate: tick.funding_rate,
            open_interest: tick.open_interest,
            ts_ms: tick.timestamp,
        }
    }
}

/// Window-resident view of a snapshot. The symbol is the cache key, so it
/// is not repeated on every sample.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSample {
    pub ts_ms: u64,
    pub price: f64,
    pub volume_24h: f64,
    pub funding_rate: f64,
    pub open_interest: Option<f64>,
}

impl From<&MarketSnapshot> for WindowSample {
    fn from(s: &MarketSnapshot) -> Self {
        Self {
            ts_ms: s.ts_ms,
            price: s.price,
            volume_24h: s.volume_24h,
            funding_rate: s.funding_rate,
            open_interest: s.open_interest,
        }
    }
}
