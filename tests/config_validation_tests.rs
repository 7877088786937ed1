//! eis_config.toml loading and validation
//!
//! Typo detection and range validation for `eis_config.toml`, exercised
//! through the public loading API.

use eis_analytics::config::validation::{
    known_config_keys, suggest_correction, validate_physical_ranges, validate_unknown_keys,
};
use eis_analytics::config::{ConfigError, EngineConfig};
use std::path::PathBuf;

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_bound_key_warns_with_suggestion() {
    let toml_str = r#"
[sensor_bounds]
r_mxa = 500.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].field.contains("r_mxa"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("sensor_bounds.r_max")
    );
    assert!(warnings[0].to_string().contains("did you mean"));
}

#[test]
fn every_documented_key_is_accepted() {
    let toml_str = r#"
[sensor_bounds]
r_min = 0.001
r_max = 1000.0
range_min = 0.1
range_max = 10000.0

[temperature]
spike_threshold_c = 2.0

[storage]
root = "BatteryStorage"

[session_defaults]
v_threshold = 0.05
z_threshold = 0.5
deviation_percent = 25.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    let fields: Vec<&str> = warnings.iter().map(|w| w.field.as_str()).collect();
    assert!(fields.is_empty(), "unexpected keys flagged: {fields:?}");
}

#[test]
fn typos_in_separate_sections_each_reported() {
    let toml_str = r#"
[storage]
rot = "x"

[session_defaults]
v_treshold = 0.1
"#;
    let warnings = validate_unknown_keys(toml_str);
    let fields: Vec<&str> = warnings.iter().map(|w| w.field.as_str()).collect();
    assert_eq!(fields.len(), 2, "{fields:?}");
    assert!(fields.contains(&"storage.rot"));
    assert!(fields.contains(&"session_defaults.v_treshold"));
}

#[test]
fn suggestion_respects_distance_limit() {
    let known = known_config_keys();
    assert_eq!(
        suggest_correction("storage.rooot", &known).as_deref(),
        Some("storage.root")
    );
    assert!(suggest_correction("storage.location", &known).is_none());
}

#[test]
fn unknown_keys_do_not_fail_loading() {
    let config = EngineConfig::from_toml_str("[temperature]\nspike_threshold_c = 3.0\nunits = \"C\"\n")
        .expect("unknown keys only warn");
    assert_eq!(config.temperature.spike_threshold_c, 3.0);
}

// ============================================================================
// Range Validation
// ============================================================================

fn validation_errors(toml_str: &str) -> Vec<String> {
    match EngineConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn partial_file_overrides_only_named_fields() {
    let config = EngineConfig::from_toml_str("[sensor_bounds]\nr_max = 500.0\n").unwrap();
    let defaults = EngineConfig::default();
    assert_eq!(config.sensor_bounds.r_max, 500.0);
    assert_eq!(config.sensor_bounds.r_min, defaults.sensor_bounds.r_min);
    assert_eq!(config.temperature, defaults.temperature);
    assert_eq!(config.storage.root, PathBuf::from("BatteryStorage"));
}

#[test]
fn inverted_bounds_rejected() {
    let errors = validation_errors("[sensor_bounds]\nr_min = 10.0\nr_max = 1.0\n");
    assert!(errors.iter().any(|e| e.contains("sensor_bounds.r_min")));
}

#[test]
fn non_positive_thresholds_rejected() {
    let errors = validation_errors(
        r#"
[temperature]
spike_threshold_c = 0.0

[session_defaults]
z_threshold = -1.0
deviation_percent = 150.0
"#,
    );
    assert_eq!(errors.len(), 3, "got: {errors:?}");
    assert!(errors.iter().any(|e| e.contains("spike_threshold_c")));
    assert!(errors.iter().any(|e| e.contains("z_threshold")));
    assert!(errors.iter().any(|e| e.contains("deviation_percent")));
}

#[test]
fn negative_minimum_rejected() {
    let errors = validation_errors("[sensor_bounds]\nrange_min = -0.5\n");
    assert!(errors.iter().any(|e| e.contains("cannot be negative")));
}

#[test]
fn empty_storage_root_rejected() {
    let errors = validation_errors("[storage]\nroot = \"\"\n");
    assert!(errors.iter().any(|e| e.contains("storage.root")));
}

#[test]
fn suspicious_values_warn_but_load() {
    let config = EngineConfig::from_toml_str(
        "[sensor_bounds]\nr_max = 20000.0\n\n[session_defaults]\ndeviation_percent = 0.5\n",
    )
    .unwrap();
    let (errors, warnings) = validate_physical_ranges(&config);
    assert!(errors.is_empty());
    assert_eq!(warnings.len(), 2);
}

#[test]
fn malformed_toml_is_parse_error() {
    let err = EngineConfig::from_toml_str("[sensor_bounds\nr_min = ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(..)));
}

// ============================================================================
// File Round Trip
// ============================================================================

#[test]
fn save_and_reload_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("eis_config.toml");

    let mut config = EngineConfig::default();
    config.temperature.spike_threshold_c = 1.5;
    config.session_defaults.deviation_percent = 12.5;
    config.save_to_file(&path).unwrap();

    let loaded = EngineConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn missing_file_is_io_error_with_path() {
    let err = EngineConfig::load_from_file(std::path::Path::new("/no/such/eis_config.toml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
    assert!(err.to_string().contains("/no/such/eis_config.toml"));
}
