//! System-wide default constants.
//!
//! Grouped by subsystem. Config structs use these for their serde defaults so
//! a missing config file behaves exactly like an empty one.

// ============================================================================
// Sensor Bounds
// ============================================================================

/// Lowest plausible real impedance reading (ohm).
pub const SENSOR_R_MIN_OHM: f64 = 0.001;

/// Highest plausible real impedance reading (ohm).
pub const SENSOR_R_MAX_OHM: f64 = 1000.0;

/// Lowest instrument measurement range (ohm).
pub const SENSOR_RANGE_MIN_OHM: f64 = 0.1;

/// Highest instrument measurement range (ohm).
pub const SENSOR_RANGE_MAX_OHM: f64 = 10_000.0;

// ============================================================================
// Detectors
// ============================================================================

/// Temperature change between consecutive samples that counts as a spike (°C).
pub const TEMPERATURE_SPIKE_THRESHOLD_C: f64 = 2.0;

// ============================================================================
// Session Defaults (CLI replay)
// ============================================================================

/// Voltage spike threshold applied to replayed files (V).
pub const SESSION_V_THRESHOLD: f64 = 0.05;

/// Impedance jump threshold applied to replayed files (ohm).
pub const SESSION_Z_THRESHOLD: f64 = 0.5;

/// Deviation band around the running mean impedance (percent).
pub const SESSION_DEVIATION_PERCENT: f64 = 25.0;

// ============================================================================
// Storage
// ============================================================================

/// Root directory for per-session output.
pub const STORAGE_ROOT: &str = "BatteryStorage";

// ============================================================================
// Ingestion
// ============================================================================

/// Row count reported when a CSV file cannot be read.
///
/// A standard EIS sweep has 29 frequency points.
pub const FALLBACK_ROW_COUNT: usize = 29;

/// Lowest state of charge picked up by file discovery (percent).
pub const DISCOVERY_SOC_MIN: i32 = 5;

/// Highest state of charge picked up by file discovery (percent).
pub const DISCOVERY_SOC_MAX: i32 = 100;

/// Directory-layout SoC files must be a multiple of this step (percent).
pub const DISCOVERY_SOC_STEP: i32 = 5;

/// Battery assigned to flat Hioki exports, which carry no battery id.
pub const HIOKI_BATTERY_ID: &str = "B01";

/// Test assigned to flat Hioki exports.
pub const HIOKI_TEST_ID: &str = "Test_1";

// ============================================================================
// Pipeline
// ============================================================================

/// Log a progress line every N pushed samples during replay.
pub const REPLAY_PROGRESS_INTERVAL: u64 = 100;
