//! Stateless detector primitives
//!
//! The chain itself (ordering, state updates, persistence) lives in
//! `session.rs`; these helpers only answer "did this value trip?".

use crate::config::SensorBounds;
use crate::types::{AnomalyKind, BandSide, Direction, Sample, SensorParameter};

/// A change between consecutive observations that crossed its threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub previous: f64,
    pub current: f64,
    /// `current - previous`
    pub delta: f64,
    pub direction: Direction,
}

/// Returns the delta when a previous value exists and `|current - previous|`
/// strictly exceeds `threshold`.
pub fn delta_exceeding(previous: Option<f64>, current: f64, threshold: f64) -> Option<Delta> {
    let previous = previous?;
    let delta = current - previous;
    (delta.abs() > threshold).then(|| Delta {
        previous,
        current,
        delta,
        direction: Direction::of(delta),
    })
}

/// Fold one observation into a running mean of `count` prior observations.
pub fn fold_mean(mean: f64, count: u64, value: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = count as f64;
    (mean * n + value) / (n + 1.0)
}

/// Band edges `mean × (1 ∓ deviation_percent / 100)`.
pub fn band_bounds(mean: f64, deviation_percent: f64) -> (f64, f64) {
    let fraction = deviation_percent / 100.0;
    (mean * (1.0 - fraction), mean * (1.0 + fraction))
}

/// Which band edge `value` crossed, if any. Edges themselves are inside.
pub fn band_violation(value: f64, mean: f64, deviation_percent: f64) -> Option<(BandSide, f64)> {
    let (low, high) = band_bounds(mean, deviation_percent);
    if value < low {
        Some((BandSide::Below, low))
    } else if value > high {
        Some((BandSide::Above, high))
    } else {
        None
    }
}

/// Sensor-bounds violations for one sample, resistance first.
///
/// The two checks are independent; both may fire.
pub fn sensor_violations(sample: &Sample, bounds: &SensorBounds) -> Vec<AnomalyKind> {
    let mut violations = Vec::new();

    if !bounds.r_contains(sample.r_ohm) {
        violations.push(AnomalyKind::SensorOutOfRange {
            parameter: SensorParameter::Resistance,
            value: sample.r_ohm,
            min: bounds.r_min,
            max: bounds.r_max,
            row_index: sample.row_index,
        });
    }

    if !bounds.range_contains(sample.range_ohm) {
        violations.push(AnomalyKind::SensorOutOfRange {
            parameter: SensorParameter::Range,
            value: sample.range_ohm,
            min: bounds.range_min,
            max: bounds.range_max,
            row_index: sample.row_index,
        });
    }

    violations
}

/// Reject reason recorded for a sensor-bounds violation.
pub fn out_of_bounds_reason(kind: &AnomalyKind) -> Option<String> {
    match kind {
        AnomalyKind::SensorOutOfRange {
            parameter,
            value,
            min,
            max,
            ..
        } => Some(format!(
            "{parameter} out of bounds: {value} not in [{min}, {max}]"
        )),
        _ => None,
    }
}
