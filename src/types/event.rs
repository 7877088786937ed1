//! Anomaly events and engine notifications
//!
//! An [`AnomalyEvent`] is built by the detector chain, handed to every
//! registered listener and to the storage analytics sink, then dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::SessionMeta;

/// Sign of a change between two consecutive observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rising,
    Falling,
}

impl Direction {
    /// Direction of `delta`; zero counts as falling (never reached for spikes).
    pub fn of(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Rising
        } else {
            Direction::Falling
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rising => write!(f, "rising"),
            Direction::Falling => write!(f, "falling"),
        }
    }
}

/// Which side of the deviation band a value fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandSide {
    Below,
    Above,
}

impl fmt::Display for BandSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandSide::Below => write!(f, "below"),
            BandSide::Above => write!(f, "above"),
        }
    }
}

/// Sample field checked against the service-wide sensor bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorParameter {
    #[serde(rename = "R_ohm")]
    Resistance,
    #[serde(rename = "Range_ohm")]
    Range,
}

impl SensorParameter {
    /// Field name as it appears in sample records.
    pub fn field_name(self) -> &'static str {
        match self {
            SensorParameter::Resistance => "R_ohm",
            SensorParameter::Range => "Range_ohm",
        }
    }
}

impl fmt::Display for SensorParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

// ============================================================================
// Anomaly Event
// ============================================================================

/// Variant-specific detection payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnomalyKind {
    VoltageSpike {
        delta: f64,
        previous: f64,
        current: f64,
        direction: Direction,
        threshold: f64,
    },
    ImpedanceJump {
        delta: f64,
        previous: f64,
        current: f64,
        direction: Direction,
        threshold: f64,
    },
    TemperatureSpike {
        delta: f64,
        previous: f64,
        current: f64,
        direction: Direction,
        threshold: f64,
        frequency_hz: f64,
    },
    SensorOutOfRange {
        parameter: SensorParameter,
        value: f64,
        min: f64,
        max: f64,
        row_index: i64,
    },
    OutOfBandDeviation {
        impedance: f64,
        running_mean: f64,
        /// The band edge that was crossed
        bound: f64,
        side: BandSide,
        deviation_percent: f64,
    },
}

impl AnomalyKind {
    /// Alert type recorded by the storage analytics sink.
    pub fn alert_type(&self) -> &'static str {
        match self {
            AnomalyKind::VoltageSpike { .. } => "VoltageSpike",
            AnomalyKind::ImpedanceJump { .. } => "ImpedanceJump",
            AnomalyKind::TemperatureSpike { .. } => "TemperatureSpike",
            AnomalyKind::SensorOutOfRange {
                parameter: SensorParameter::Resistance,
                ..
            } => "ResistanceOutOfBounds",
            AnomalyKind::SensorOutOfRange {
                parameter: SensorParameter::Range,
                ..
            } => "RangeMismatch",
            AnomalyKind::OutOfBandDeviation { .. } => "OutOfBandWarning",
        }
    }

    /// Numeric magnitude: |Δ| for spikes and jumps, the raw value otherwise.
    pub fn magnitude(&self) -> f64 {
        match self {
            AnomalyKind::VoltageSpike { delta, .. }
            | AnomalyKind::ImpedanceJump { delta, .. }
            | AnomalyKind::TemperatureSpike { delta, .. } => delta.abs(),
            AnomalyKind::SensorOutOfRange { value, .. } => *value,
            AnomalyKind::OutOfBandDeviation { impedance, .. } => *impedance,
        }
    }

    /// Threshold or bound the magnitude was compared against.
    ///
    /// For sensor violations this is the bound that was crossed.
    pub fn threshold(&self) -> f64 {
        match self {
            AnomalyKind::VoltageSpike { threshold, .. }
            | AnomalyKind::ImpedanceJump { threshold, .. }
            | AnomalyKind::TemperatureSpike { threshold, .. } => *threshold,
            AnomalyKind::SensorOutOfRange { value, min, max, .. } => {
                if value < min {
                    *min
                } else {
                    *max
                }
            }
            AnomalyKind::OutOfBandDeviation { bound, .. } => *bound,
        }
    }

    fn describe(&self, soc_percent: i32) -> String {
        match self {
            AnomalyKind::VoltageSpike { delta, direction, .. } => {
                format!("Voltage spike detected: ΔV={delta:+.3}V ({direction})")
            }
            AnomalyKind::ImpedanceJump { delta, direction, .. } => {
                format!("Impedance jump detected: ΔZ={delta:+.3}Ω ({direction})")
            }
            AnomalyKind::TemperatureSpike {
                delta,
                direction,
                frequency_hz,
                ..
            } => format!(
                "Temperature spike detected: ΔT={delta:+.3}°C ({direction}) at F={frequency_hz:.3}Hz, SoC={soc_percent}%"
            ),
            AnomalyKind::SensorOutOfRange {
                parameter,
                value,
                min,
                max,
                row_index,
            } => format!(
                "Sensor validation failed: {parameter}={value:.3} not in range [{min:.3}, {max:.3}] for sample #{row_index}"
            ),
            AnomalyKind::OutOfBandDeviation {
                impedance,
                running_mean,
                side,
                ..
            } => format!(
                "Impedance out of band: {impedance:.3} {side} expected range (Mean: {running_mean:.3})"
            ),
        }
    }
}

/// A detection raised for one accepted sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub battery_id: String,
    pub test_id: String,
    pub soc_percent: i32,
    pub message: String,
    pub detected_at: DateTime<Utc>,
    pub kind: AnomalyKind,
}

impl AnomalyEvent {
    /// Stamp `kind` with the session identifiers and a rendered message.
    pub fn new(meta: &SessionMeta, kind: AnomalyKind) -> Self {
        Self {
            battery_id: meta.battery_id.clone(),
            test_id: meta.test_id.clone(),
            soc_percent: meta.soc_percent,
            message: kind.describe(meta.soc_percent),
            detected_at: Utc::now(),
            kind,
        }
    }

    pub fn alert_type(&self) -> &'static str {
        self.kind.alert_type()
    }

    pub fn magnitude(&self) -> f64 {
        self.kind.magnitude()
    }

    pub fn threshold(&self) -> f64 {
        self.kind.threshold()
    }
}

// ============================================================================
// Engine Notifications
// ============================================================================

/// Everything the engine tells its listeners about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EngineEvent {
    SessionStarted {
        battery_id: String,
        test_id: String,
        soc_percent: i32,
        message: String,
    },
    SampleAccepted {
        battery_id: String,
        soc_percent: i32,
        row_index: i64,
        impedance: f64,
        accepted_count: u64,
    },
    Anomaly(AnomalyEvent),
    SessionCompleted {
        battery_id: String,
        test_id: String,
        soc_percent: i32,
        accepted_count: u64,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMeta {
        SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 10.0)
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::of(3.5).to_string(), "rising");
        assert_eq!(Direction::of(-3.5).to_string(), "falling");
    }

    #[test]
    fn test_alert_types() {
        let r = AnomalyKind::SensorOutOfRange {
            parameter: SensorParameter::Resistance,
            value: 2000.0,
            min: 0.001,
            max: 1000.0,
            row_index: 4,
        };
        let range = AnomalyKind::SensorOutOfRange {
            parameter: SensorParameter::Range,
            value: 0.01,
            min: 0.1,
            max: 10_000.0,
            row_index: 4,
        };
        assert_eq!(r.alert_type(), "ResistanceOutOfBounds");
        assert_eq!(range.alert_type(), "RangeMismatch");
        assert_eq!(r.threshold(), 1000.0);
        assert_eq!(range.threshold(), 0.1);
    }

    #[test]
    fn test_spike_magnitude_is_absolute() {
        let kind = AnomalyKind::VoltageSpike {
            delta: -0.07,
            previous: 3.77,
            current: 3.70,
            direction: Direction::Falling,
            threshold: 0.05,
        };
        assert!((kind.magnitude() - 0.07).abs() < 1e-12);
        assert_eq!(kind.threshold(), 0.05);
    }

    #[test]
    fn test_event_carries_session_identity() {
        let event = AnomalyEvent::new(
            &meta(),
            AnomalyKind::TemperatureSpike {
                delta: 3.5,
                previous: 20.0,
                current: 23.5,
                direction: Direction::Rising,
                threshold: 2.0,
                frequency_hz: 1000.0,
            },
        );
        assert_eq!(event.battery_id, "B01");
        assert_eq!(event.soc_percent, 50);
        assert!(event.message.contains("ΔT=+3.500°C (rising)"));
        assert!(event.message.contains("SoC=50%"));
    }
}
