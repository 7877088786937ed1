//! Engine Configuration - sensor bounds and detector thresholds as TOML values
//!
//! Each struct implements `Default` with the documented service defaults, so a
//! partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming the config file to load.
pub const CONFIG_ENV_VAR: &str = "EIS_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "eis_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one engine instance.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$EIS_CONFIG` env var
/// 2. `./eis_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Service-wide plausibility bounds for R_ohm and Range_ohm
    #[serde(default)]
    pub sensor_bounds: SensorBounds,

    /// Temperature spike detection
    #[serde(default)]
    pub temperature: TemperatureConfig,

    /// Session output location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Thresholds the CLI applies when it builds session metadata for a file
    #[serde(default)]
    pub session_defaults: SessionDefaults,
}

impl EngineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$EIS_CONFIG` environment variable
    /// 2. `./eis_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys are logged, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Engine config saved");
        Ok(())
    }

    /// Validate every value for internal consistency.
    ///
    /// Rules:
    /// - All numbers must be finite
    /// - Bound minimums must be non-negative and strictly below their maximums
    /// - Spike and session thresholds must be > 0
    /// - Deviation percent must lie in (0, 100]
    /// - Storage root must not be empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let b = &self.sensor_bounds;
        Self::check_bounds(b.r_min, b.r_max, "sensor_bounds.r", &mut errors);
        Self::check_bounds(b.range_min, b.range_max, "sensor_bounds.range", &mut errors);

        Self::check_positive(
            self.temperature.spike_threshold_c,
            "temperature.spike_threshold_c",
            &mut errors,
        );

        let s = &self.session_defaults;
        Self::check_positive(s.v_threshold, "session_defaults.v_threshold", &mut errors);
        Self::check_positive(s.z_threshold, "session_defaults.z_threshold", &mut errors);
        if !s.deviation_percent.is_finite() || s.deviation_percent <= 0.0 || s.deviation_percent > 100.0 {
            errors.push(format!(
                "session_defaults.deviation_percent = {} must be in (0, 100]",
                s.deviation_percent
            ));
        }

        if self.storage.root.as_os_str().is_empty() {
            errors.push("storage.root must not be empty".to_string());
        }

        let (range_errors, range_warnings) = super::validation::validate_physical_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_bounds(min: f64, max: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, catch them explicitly
        if !min.is_finite() || !max.is_finite() {
            errors.push(format!(
                "{name}: values must be finite (got min={min}, max={max})"
            ));
            return;
        }
        if min >= max {
            errors.push(format!("{name}_min ({min}) must be < {name}_max ({max})"));
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value <= 0.0 {
            errors.push(format!("{name} = {value} must be a finite number > 0"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n{}", format_errors(.0))]
    Validation(Vec<String>),
}

fn format_errors(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Sensor Bounds
// ============================================================================

/// Plausibility window for raw instrument readings, shared by every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorBounds {
    #[serde(default = "default_r_min")]
    pub r_min: f64,

    #[serde(default = "default_r_max")]
    pub r_max: f64,

    #[serde(default = "default_range_min")]
    pub range_min: f64,

    #[serde(default = "default_range_max")]
    pub range_max: f64,
}

fn default_r_min() -> f64 { defaults::SENSOR_R_MIN_OHM }
fn default_r_max() -> f64 { defaults::SENSOR_R_MAX_OHM }
fn default_range_min() -> f64 { defaults::SENSOR_RANGE_MIN_OHM }
fn default_range_max() -> f64 { defaults::SENSOR_RANGE_MAX_OHM }

impl Default for SensorBounds {
    fn default() -> Self {
        Self {
            r_min: default_r_min(),
            r_max: default_r_max(),
            range_min: default_range_min(),
            range_max: default_range_max(),
        }
    }
}

impl SensorBounds {
    pub fn r_contains(&self, r_ohm: f64) -> bool {
        (self.r_min..=self.r_max).contains(&r_ohm)
    }

    pub fn range_contains(&self, range_ohm: f64) -> bool {
        (self.range_min..=self.range_max).contains(&range_ohm)
    }
}

// ============================================================================
// Temperature
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    /// |ΔT| between consecutive samples above which a spike fires (°C)
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold_c: f64,
}

fn default_spike_threshold() -> f64 { defaults::TEMPERATURE_SPIKE_THRESHOLD_C }

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            spike_threshold_c: default_spike_threshold(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sessions are written under `<root>/<BatteryId>/<TestId>/<Soc>%`
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf { PathBuf::from(defaults::STORAGE_ROOT) }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

// ============================================================================
// Session Defaults
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_v_threshold")]
    pub v_threshold: f64,

    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,

    #[serde(default = "default_deviation_percent")]
    pub deviation_percent: f64,
}

fn default_v_threshold() -> f64 { defaults::SESSION_V_THRESHOLD }
fn default_z_threshold() -> f64 { defaults::SESSION_Z_THRESHOLD }
fn default_deviation_percent() -> f64 { defaults::SESSION_DEVIATION_PERCENT }

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            v_threshold: default_v_threshold(),
            z_threshold: default_z_threshold(),
            deviation_percent: default_deviation_percent(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok(), "Default config must pass validation");
    }

    #[test]
    fn test_defaults_match_service_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.sensor_bounds.r_min, 0.001);
        assert_eq!(config.sensor_bounds.r_max, 1000.0);
        assert_eq!(config.sensor_bounds.range_min, 0.1);
        assert_eq!(config.sensor_bounds.range_max, 10_000.0);
        assert_eq!(config.temperature.spike_threshold_c, 2.0);
        assert_eq!(config.storage.root, PathBuf::from("BatteryStorage"));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
[sensor_bounds]
r_max = 50.0
"#,
        )
        .expect("partial config should load");
        assert_eq!(config.sensor_bounds.r_max, 50.0);
        assert_eq!(config.sensor_bounds.r_min, 0.001);
        assert_eq!(config.temperature.spike_threshold_c, 2.0);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig::default();
        let toml_str = config.to_toml().expect("serialize");
        let parsed: EngineConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = EngineConfig::default();
        config.sensor_bounds.r_min = 10.0;
        config.sensor_bounds.r_max = 1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sensor_bounds.r_min"));
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.temperature.spike_threshold_c = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deviation_percent_range() {
        let mut config = EngineConfig::default();
        config.session_defaults.deviation_percent = 100.0;
        assert!(config.validate().is_ok());
        config.session_defaults.deviation_percent = 0.0;
        assert!(config.validate().is_err());
        config.session_defaults.deviation_percent = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let bounds = SensorBounds::default();
        assert!(bounds.r_contains(0.001));
        assert!(bounds.r_contains(1000.0));
        assert!(!bounds.r_contains(1000.001));
        assert!(!bounds.range_contains(0.05));
    }
}
