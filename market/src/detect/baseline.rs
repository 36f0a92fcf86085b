//! Rolling volume statistics.
//!
//! The window granularity is fixed by the ingestion cadence, so the three
//! nominal horizons (5m / 15m / 1h) are approximated by sample counts. The
//! longest warm horizon is the detection baseline; the shorter two are kept
//! for observability and strength context.

use crate::types::WindowSample;

#[derive(Debug, Clone, Copy)]
pub struct BaselineHorizons {
    pub short: usize,
    pub medium: usize,
    pub long: usize,
}

impl Default for BaselineHorizons {
    fn default() -> Self {
        Self {
            short: 5,
            medium: 10,
            long: 20,
        }
    }
}

/// Mean and standard deviation of 24h volume over one horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeBaseline {
    pub mean: f64,
    pub stddev: f64,
    pub samples: usize,
}

/// Stats over the most recent `horizon` samples (or all of them when the
/// window is shorter). None on an empty window.
pub fn volume_baseline(history: &[WindowSample], horizon: usize) -> Option<VolumeBaseline> {
    if history.is_empty() || horizon == 0 {
        return None;
    }

    let start = history.len().saturating_sub(horizon);
    let slice = &history[start..];
    let n = slice.len() as f64;

    let mean = slice.iter().map(|s| s.volume_24h).sum::<f64>() / n;
    let variance = slice
        .iter()
        .map(|s| {
            let d = s.volume_24h - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    Some(VolumeBaseline {
        mean,
        stddev: variance.sqrt(),
        samples: slice.len(),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct BaselineSet {
    pub short: Option<VolumeBaseline>,
    pub medium: Option<VolumeBaseline>,
    pub long: Option<VolumeBaseline>,
}

impl BaselineSet {
    /// The baseline detection rules compare against: the longest horizon
    /// that produced stats.
    pub fn detection_baseline(&self) -> Option<&VolumeBaseline> {
        self.long.as_ref().or(self.medium.as_ref()).or(self.short.as_ref())
    }
}

pub fn compute(history: &[WindowSample], horizons: BaselineHorizons) -> BaselineSet {
    BaselineSet {
        short: volume_baseline(history, horizons.short),
        medium: volume_baseline(history, horizons.medium),
        long: volume_baseline(history, horizons.long),
    }
}
