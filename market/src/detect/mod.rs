//! Baseline & signal detection.
//!
//! Every rule in this module is pure and deterministic given the latest
//! snapshot and its prior history; persistence, cooldown handling and
//! delivery all live downstream. Any I/O belongs to the caller.

pub mod baseline;
pub mod funding;
pub mod oi;
pub mod volume;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{MarketSnapshot, WindowSample};
use baseline::BaselineHorizons;

/// Kind of anomalous event. The volume tiers are mutually exclusive: a
/// single snapshot reports at most the strongest satisfied tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    VolumeSpike2x,
    VolumeSpike3x,
    VolumeSpike5x,
    FundingExtreme,
    OiDivergence,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::VolumeSpike2x => "volume-spike-2x",
            SignalKind::VolumeSpike3x => "volume-spike-3x",
            SignalKind::VolumeSpike5x => "volume-spike-5x",
            SignalKind::FundingExtreme => "funding-extreme",
            SignalKind::OiDivergence => "oi-divergence",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volume-spike-2x" => Ok(SignalKind::VolumeSpike2x),
            "volume-spike-3x" => Ok(SignalKind::VolumeSpike3x),
            "volume-spike-5x" => Ok(SignalKind::VolumeSpike5x),
            "funding-extreme" => Ok(SignalKind::FundingExtreme),
            "oi-divergence" => Ok(SignalKind::OiDivergence),
            other => Err(anyhow::anyhow!("invalid signal kind: {}", other)),
        }
    }
}

/// A detected event before dedup/persistence: what happened, how strongly,
/// and when the detector looked.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCandidate {
    pub symbol: String,
    pub kind: SignalKind,
    pub strength: f64,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Prior samples required before any rule evaluates. Below this the
    /// window is cold and the snapshot emits nothing.
    pub min_samples: usize,
    pub horizons: BaselineHorizons,
    /// Absolute funding rate at or above which a funding-extreme signal
    /// fires. Default 0.0003 (0.03%).
    pub funding_threshold: f64,
    /// Minimum relative price move for OI divergence.
    pub oi_min_price_delta: f64,
    /// Minimum relative open-interest move for OI divergence.
    pub oi_min_oi_delta: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            horizons: BaselineHorizons::default(),
            funding_threshold: 0.0003,
            oi_min_price_delta: 0.005,
            oi_min_oi_delta: 0.02,
        }
    }
}

pub struct Detector {
    cfg: DetectorConfig,
}

impl Detector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self { cfg }
    }

    /// Evaluate every rule against `latest`, using `history` (the window
    /// BEFORE this snapshot, oldest → newest) as the baseline. A spike
    /// therefore never dilutes its own baseline.
    ///
    /// Returns zero or more candidates, each timestamped at evaluation
    /// time; a single snapshot may trip several independent rules.
    pub fn evaluate(
        &self,
        latest: &MarketSnapshot,
        history: &[WindowSample],
        now_ms: u64,
    ) -> Vec<SignalCandidate> {
        // Cold window: no rule fires regardless of thresholds.
        if history.len() < self.cfg.min_samples {
            return Vec::new();
        }

        let mut out = Vec::new();

        let baselines = baseline::compute(history, self.cfg.horizons);
        if let Some(long) = baselines.detection_baseline() {
            if let Some((kind, strength)) = volume::detect_volume_spike(latest.volume_24h, long) {
                out.push(SignalCandidate {
                    symbol: latest.symbol.clone(),
                    kind,
                    strength,
                    ts_ms: now_ms,
                });
            }
        }

        if let Some(strength) =
            funding::detect_funding_extreme(latest.funding_rate, self.cfg.funding_threshold)
        {
            out.push(SignalCandidate {
                symbol: latest.symbol.clone(),
                kind: SignalKind::FundingExtreme,
                strength,
                ts_ms: now_ms,
            });
        }

        if let Some(strength) = oi::detect_oi_divergence(
            latest,
            history,
            self.cfg.oi_min_price_delta,
            self.cfg.oi_min_oi_delta,
        ) {
            out.push(SignalCandidate {
                symbol: latest.symbol.clone(),
                kind: SignalKind::OiDivergence,
                strength,
                ts_ms: now_ms,
            });
        }

        out
    }
}
