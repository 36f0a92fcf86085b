//! Funding-rate extreme.
//!
//! Fires when the absolute funding rate reaches the configured threshold
//! (default 0.03%). Strength is the ratio of |rate| to the threshold, so a
//! rate at exactly the threshold reports 1.0.

/// Returns the strength when |rate| >= threshold, None otherwise.
pub fn detect_funding_extreme(rate: f64, threshold: f64) -> Option<f64> {
    if threshold <= 0.0 {
        return None;
    }

    let magnitude = rate.abs();
    if magnitude >= threshold {
        Some(magnitude / threshold)
    } else {
        None
    }
}
