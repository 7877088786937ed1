//! EIS measurement samples and per-session metadata
//!
//! `Sample` and `SessionMeta` are plain values: built once, never mutated.
//! The CSV parsing rules here are shared by the file-ingestion path
//! ([`crate::ingest`]) and anything decoding live transport payloads.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column separators accepted in EIS CSV rows.
pub const CSV_SEPARATORS: [char; 3] = [',', ';', '\t'];

/// Minimum number of columns in an EIS data row (F, R, X, V, T, Range).
pub const MIN_CSV_COLUMNS: usize = 6;

// ============================================================================
// Session Metadata
// ============================================================================

/// Metadata describing one battery / test / state-of-charge ingestion run.
///
/// Supplied with `StartSession` and owned by the engine until `EndSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionMeta {
    /// Battery identifier (e.g. "B01")
    pub battery_id: String,

    /// Test identifier (e.g. "Test_1")
    pub test_id: String,

    /// State of charge in percent, 0..=100
    pub soc_percent: i32,

    /// Source file name (informational)
    #[serde(default)]
    pub file_name: String,

    /// Expected number of samples (informational)
    #[serde(default)]
    pub total_rows: i64,

    /// Voltage spike threshold in volts
    #[serde(rename = "VThreshold")]
    pub v_threshold: f64,

    /// Impedance jump threshold in ohms
    #[serde(rename = "ZThreshold")]
    pub z_threshold: f64,

    /// Out-of-band deviation band around the running mean, in percent
    pub deviation_percent: f64,
}

impl SessionMeta {
    /// Build metadata with empty informational fields.
    pub fn new(
        battery_id: impl Into<String>,
        test_id: impl Into<String>,
        soc_percent: i32,
        v_threshold: f64,
        z_threshold: f64,
        deviation_percent: f64,
    ) -> Self {
        Self {
            battery_id: battery_id.into(),
            test_id: test_id.into(),
            soc_percent,
            file_name: String::new(),
            total_rows: 0,
            v_threshold,
            z_threshold,
            deviation_percent,
        }
    }

    /// Attach the informational source-file fields.
    pub fn with_source(mut self, file_name: impl Into<String>, total_rows: i64) -> Self {
        self.file_name = file_name.into();
        self.total_rows = total_rows;
        self
    }
}

// ============================================================================
// Sample
// ============================================================================

/// One frequency-domain impedance measurement.
///
/// `t_deg_c` and `range_ohm` are deliberately not range-checked here: sentinel
/// or out-of-range values are surfaced later by sensor-bounds detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sample {
    /// Excitation frequency in Hz (> 0, finite)
    pub frequency_hz: f64,

    /// Real part of the impedance (ohm)
    #[serde(rename = "R_ohm")]
    pub r_ohm: f64,

    /// Imaginary part of the impedance (ohm)
    #[serde(rename = "X_ohm")]
    pub x_ohm: f64,

    /// Cell voltage (V)
    #[serde(rename = "V")]
    pub v: f64,

    /// Cell temperature (°C)
    #[serde(rename = "T_degC")]
    pub t_deg_c: f64,

    /// Instrument measurement range (ohm)
    #[serde(rename = "Range_ohm")]
    pub range_ohm: f64,

    /// Position of the row in its source sequence. Trusted as supplied.
    pub row_index: i64,

    /// Capture time (UTC). `None` means the producer never stamped it.
    #[serde(default)]
    pub captured_at_utc: Option<DateTime<Utc>>,

    /// Capture time in the producer's local zone (informational)
    #[serde(default)]
    pub captured_at_local: Option<DateTime<Local>>,
}

impl Sample {
    /// Build a sample stamped with the current time.
    pub fn new(
        frequency_hz: f64,
        r_ohm: f64,
        x_ohm: f64,
        v: f64,
        t_deg_c: f64,
        range_ohm: f64,
        row_index: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            frequency_hz,
            r_ohm,
            x_ohm,
            v,
            t_deg_c,
            range_ohm,
            row_index,
            captured_at_utc: Some(now),
            captured_at_local: Some(now.with_timezone(&Local)),
        }
    }

    /// Fill capture times left unset by the sender with the receipt time.
    pub fn stamp_receipt(&mut self) {
        if self.captured_at_utc.is_none() {
            let now = Utc::now();
            self.captured_at_utc = Some(now);
            self.captured_at_local = Some(now.with_timezone(&Local));
        }
    }

    /// Impedance magnitude |Z| = sqrt(R² + X²).
    pub fn impedance(&self) -> f64 {
        self.r_ohm.hypot(self.x_ohm)
    }

    /// Raw comma-separated representation used in reject logs.
    pub fn raw_representation(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.frequency_hz,
            self.r_ohm,
            self.x_ohm,
            self.v,
            self.t_deg_c,
            self.range_ohm,
            self.row_index
        )
    }

    /// Parse one EIS data row.
    ///
    /// Quotes are stripped, columns may be separated by `,` `;` or tab, and
    /// the first six columns are F, R, X, V, T, Range. Extra columns are
    /// ignored. The returned sample carries `row_index` and the current time.
    pub fn parse_csv(line: &str, row_index: i64) -> Result<Self, SampleParseError> {
        if line.trim().is_empty() {
            return Err(SampleParseError::EmptyLine);
        }

        let cleaned = line.replace('"', "");
        let parts: Vec<&str> = cleaned.split(CSV_SEPARATORS).collect();
        if parts.len() < MIN_CSV_COLUMNS {
            return Err(SampleParseError::TooFewColumns(parts.len()));
        }

        let frequency_hz = parse_f64(parts[0], "FrequencyHz")?;
        let r_ohm = parse_f64(parts[1], "R_ohm")?;
        let x_ohm = parse_f64(parts[2], "X_ohm")?;
        let v = parse_f64(parts[3], "V")?;
        let t_deg_c = parse_f64(parts[4], "T_degC")?;
        let range_ohm = parse_f64(parts[5], "Range_ohm")?;

        if frequency_hz.is_nan() || frequency_hz <= 0.0 {
            return Err(SampleParseError::NonPositiveFrequency(frequency_hz));
        }
        for (field, value) in [("R_ohm", r_ohm), ("X_ohm", x_ohm), ("V", v)] {
            if !value.is_finite() {
                return Err(SampleParseError::NonFinite { field, value });
            }
        }

        Ok(Self::new(
            frequency_hz,
            r_ohm,
            x_ohm,
            v,
            t_deg_c,
            range_ohm,
            row_index,
        ))
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} F={:.3}Hz V={:.3}V Z={:.3}Ω T={:.1}°C",
            self.row_index,
            self.frequency_hz,
            self.v,
            self.impedance(),
            self.t_deg_c
        )
    }
}

fn parse_f64(raw: &str, field: &'static str) -> Result<f64, SampleParseError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| SampleParseError::InvalidNumber {
            field,
            raw: raw.trim().to_string(),
        })
}

/// Why a CSV row could not become a [`Sample`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleParseError {
    #[error("Empty line")]
    EmptyLine,

    #[error("Expected at least 6 columns, found {0}")]
    TooFewColumns(usize),

    #[error("Invalid {field} value: '{raw}'")]
    InvalidNumber { field: &'static str, raw: String },

    #[error("FrequencyHz must be positive, got {0}")]
    NonPositiveFrequency(f64),

    #[error("Invalid {field} value: {value}")]
    NonFinite { field: &'static str, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impedance_magnitude() {
        let sample = Sample::new(1000.0, 3.0, 4.0, 3.7, 25.0, 10.0, 1);
        assert!((sample.impedance() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_csv_accepts_mixed_separators_and_quotes() {
        let sample = Sample::parse_csv("\"1000.5\";0.012\t-0.003,3.71,24.5,3.0,extra", 7)
            .expect("row should parse");
        assert_eq!(sample.frequency_hz, 1000.5);
        assert_eq!(sample.r_ohm, 0.012);
        assert_eq!(sample.x_ohm, -0.003);
        assert_eq!(sample.v, 3.71);
        assert_eq!(sample.t_deg_c, 24.5);
        assert_eq!(sample.range_ohm, 3.0);
        assert_eq!(sample.row_index, 7);
        assert!(sample.captured_at_utc.is_some());
    }

    #[test]
    fn test_parse_csv_rejects_short_rows() {
        let err = Sample::parse_csv("1,2,3", 1).unwrap_err();
        assert_eq!(err, SampleParseError::TooFewColumns(3));
    }

    #[test]
    fn test_parse_csv_rejects_non_positive_frequency() {
        let err = Sample::parse_csv("0,1,1,3.7,25,10", 1).unwrap_err();
        assert!(matches!(err, SampleParseError::NonPositiveFrequency(_)));
    }

    #[test]
    fn test_parse_csv_rejects_non_finite_voltage() {
        let err = Sample::parse_csv("10,1,1,NaN,25,10", 1).unwrap_err();
        assert!(matches!(err, SampleParseError::NonFinite { field: "V", .. }));
    }

    #[test]
    fn test_parse_csv_keeps_sentinel_temperature() {
        // Temperature is not range-checked at parse time
        let sample = Sample::parse_csv("10,1,1,3.7,-999,10", 1).expect("row should parse");
        assert_eq!(sample.t_deg_c, -999.0);
    }

    #[test]
    fn test_raw_representation() {
        let mut sample = Sample::new(10.0, 1.5, -0.5, 3.7, 25.0, 10.0, 3);
        sample.captured_at_utc = None;
        assert_eq!(sample.raw_representation(), "10,1.5,-0.5,3.7,25,10,3");
    }

    #[test]
    fn test_session_meta_json_field_names() {
        let meta = SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 10.0)
            .with_source("50%.csv", 29);
        let json = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(json["BatteryId"], "B01");
        assert_eq!(json["SocPercent"], 50);
        assert_eq!(json["VThreshold"], 0.05);
        assert_eq!(json["ZThreshold"], 0.5);
        assert_eq!(json["TotalRows"], 29);
    }
}
