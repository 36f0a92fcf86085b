//! Volume Spike (Anomalous-Activity Signal)
//!
//! Fires when the latest 24h volume stands well above the rolling mean of
//! the historical window.
//!
//! ## Tiering
//! The rule carries three multiplier tiers, k ∈ {2, 3, 5}. Tiers are
//! **mutually exclusive**: a snapshot at 3.5× the baseline is a 3x spike
//! and nothing else. Checks run strongest-first so the highest satisfied
//! tier wins.
//!
//! ## Strength
//! ```text
//! strength = volume_now / baseline_mean
//! ```
//! A 3x spike at 320k against a 100k baseline reports strength 3.2.
//!
//! ## Fail-safe edge cases
//! - `baseline.mean <= 0` → no signal. A zero or negative mean means the
//!   window holds no meaningful activity to compare against; emitting a
//!   ratio against it would be noise.
//! - Warm-up is enforced upstream (`DetectorConfig::min_samples`): this
//!   function assumes the caller only hands it a warm baseline.

use super::SignalKind;
use super::baseline::VolumeBaseline;

const TIERS: [(f64, SignalKind); 3] = [
    (5.0, SignalKind::VolumeSpike5x),
    (3.0, SignalKind::VolumeSpike3x),
    (2.0, SignalKind::VolumeSpike2x),
];

/// Evaluate the spike tiers against one volume observation.
///
/// Returns the strongest satisfied tier and the ratio to baseline, or None
/// when volume sits under every tier.
pub fn detect_volume_spike(
    volume_now: f64,
    baseline: &VolumeBaseline,
) -> Option<(SignalKind, f64)> {
    if baseline.mean <= 0.0 {
        return None;
    }

    let ratio = volume_now / baseline.mean;

    for (k, kind) in TIERS {
        if ratio >= k {
            return Some((kind, ratio));
        }
    }

    None
}
