//! Request validation run before any state changes
//!
//! Both checks short-circuit on the first failure and name the offending
//! field and value.

use super::error::ValidationError;
use crate::types::{Sample, SessionMeta};

/// Check session metadata supplied with `StartSession`.
pub fn validate_meta(meta: Option<SessionMeta>) -> Result<SessionMeta, ValidationError> {
    let Some(meta) = meta else {
        return Err(ValidationError::new("Session metadata is missing", "meta", "null"));
    };

    if meta.battery_id.trim().is_empty() {
        return Err(ValidationError::new(
            "BatteryId is required",
            "BatteryId",
            &meta.battery_id,
        ));
    }
    if meta.test_id.trim().is_empty() {
        return Err(ValidationError::new("TestId is required", "TestId", &meta.test_id));
    }
    if !(0..=100).contains(&meta.soc_percent) {
        return Err(ValidationError::new(
            "SocPercent must be between 0 and 100",
            "SocPercent",
            meta.soc_percent,
        ));
    }
    // `!(x > 0.0)` also catches NaN
    if !(meta.v_threshold > 0.0) || meta.v_threshold.is_infinite() {
        return Err(ValidationError::new(
            "VThreshold must be positive",
            "VThreshold",
            meta.v_threshold,
        ));
    }
    if !(meta.z_threshold > 0.0) || meta.z_threshold.is_infinite() {
        return Err(ValidationError::new(
            "ZThreshold must be positive",
            "ZThreshold",
            meta.z_threshold,
        ));
    }
    if !(meta.deviation_percent > 0.0 && meta.deviation_percent <= 100.0) {
        return Err(ValidationError::new(
            "DeviationPercent must be greater than 0 and at most 100",
            "DeviationPercent",
            meta.deviation_percent,
        ));
    }

    Ok(meta)
}

/// Structural checks on one sample.
///
/// `T_degC` and `Range_ohm` are left alone: sentinel values there are
/// reported by sensor-bounds detection instead.
pub fn validate_sample(sample: &Sample) -> Result<(), ValidationError> {
    let f = sample.frequency_hz;
    if !f.is_finite() || f <= 0.0 {
        return Err(ValidationError::new(
            format!("Invalid FrequencyHz: {f} (must be positive and finite)"),
            "FrequencyHz",
            f,
        ));
    }

    for (field, value) in [("R_ohm", sample.r_ohm), ("X_ohm", sample.x_ohm), ("V", sample.v)] {
        if !value.is_finite() {
            return Err(ValidationError::new(
                format!("Invalid {field}: {value}"),
                field,
                value,
            ));
        }
    }

    if sample.row_index < 0 {
        return Err(ValidationError::new(
            format!("Invalid RowIndex: {} (must be non-negative)", sample.row_index),
            "RowIndex",
            sample.row_index,
        ));
    }

    if sample.captured_at_utc.is_none() {
        return Err(ValidationError::new(
            "Invalid Timestamp: capture time not set",
            "CapturedAtUtc",
            "unset",
        ));
    }

    Ok(())
}
