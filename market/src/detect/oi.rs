//! Open-interest divergence.
//!
//! Compares the relative price move and the relative open-interest move
//! across the window (oldest sample vs latest snapshot). When the two move
//! in opposite directions and both moves clear their configured magnitudes,
//! the rule fires. Only evaluated when OI is present at both ends of the
//! window; spot-only feeds never trip it.

use crate::types::{MarketSnapshot, WindowSample};

/// Strength is the OI move expressed as a multiple of its minimum
/// magnitude, so a move at exactly the floor reports 1.0.
pub fn detect_oi_divergence(
    latest: &MarketSnapshot,
    history: &[WindowSample],
    min_price_delta: f64,
    min_oi_delta: f64,
) -> Option<f64> {
    let oi_now = latest.open_interest?;
    let oldest = history.first()?;
    let oi_then = oldest.open_interest?;

    if oldest.price <= 0.0 || oi_then <= 0.0 || min_oi_delta <= 0.0 {
        return None;
    }

    let price_delta = (latest.price - oldest.price) / oldest.price;
    let oi_delta = (oi_now - oi_then) / oi_then;

    // Same direction (or either side flat) is not a divergence.
    if price_delta * oi_delta >= 0.0 {
        return None;
    }

    if price_delta.abs() < min_price_delta || oi_delta.abs() < min_oi_delta {
        return None;
    }

    Some(oi_delta.abs() / min_oi_delta)
}
