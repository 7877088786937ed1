//! Checks on `eis_config.toml` beyond what serde enforces.
//!
//! Misspelled keys would otherwise be dropped silently by `#[serde(default)]`,
//! leaving a sensor bound or threshold at its default. The raw document is
//! walked before deserialization and every key the engine does not read is
//! reported with the closest known key. Range checks run on the parsed config.

use std::collections::HashSet;
use std::fmt;

/// Non-fatal finding about the config file.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// Dotted key the warning refers to
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    fn suspicious(field: &str, message: String) -> Self {
        Self {
            field: field.to_string(),
            message,
            suggestion: None,
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.suggestion {
            Some(s) => write!(f, "{}, did you mean '{s}'?", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ============================================================================
// Known Keys
// ============================================================================

/// Every field `EngineConfig` reads, as `section.field`.
const FIELDS: &[&str] = &[
    "sensor_bounds.r_min",
    "sensor_bounds.r_max",
    "sensor_bounds.range_min",
    "sensor_bounds.range_max",
    "temperature.spike_threshold_c",
    "storage.root",
    "session_defaults.v_threshold",
    "session_defaults.z_threshold",
    "session_defaults.deviation_percent",
];

/// Every section name and `section.field` path the engine reads.
pub fn known_config_keys() -> HashSet<&'static str> {
    let mut keys = HashSet::new();
    for &field in FIELDS {
        if let Some((section, _)) = field.split_once('.') {
            keys.insert(section);
        }
        keys.insert(field);
    }
    keys
}

/// Dotted paths of every key in a parsed document, tables before their
/// contents.
fn dotted_keys(value: &toml::Value) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending: Vec<(String, &toml::Value)> = vec![(String::new(), value)];
    while let Some((prefix, node)) = pending.pop() {
        let Some(table) = node.as_table() else {
            continue;
        };
        for (name, child) in table {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            if child.is_table() {
                pending.push((path.clone(), child));
            }
            out.push(path);
        }
    }
    out
}

// ============================================================================
// Suggestions
// ============================================================================

/// Edit distance (insert, delete, substitute) between two keys.
fn edit_distance(from: &str, to: &str) -> usize {
    let to: Vec<char> = to.chars().collect();
    let mut row: Vec<usize> = (0..=to.len()).collect();

    for (i, a) in from.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, b) in to.iter().enumerate() {
            let substitute = diagonal + usize::from(a != *b);
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }
    row[to.len()]
}

const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Closest known key within three edits. Ties go to the alphabetically
/// first key.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (edit_distance(unknown, k), k))
        .filter(|&(d, _)| d <= MAX_SUGGESTION_DISTANCE)
        .min()
        .map(|(_, k)| k.to_string())
}

/// Warn about keys the engine ignores.
///
/// Malformed TOML yields no warnings here; deserialization reports it.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(document) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    dotted_keys(&document)
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Value Ranges
// ============================================================================

/// Measurement-level sanity checks on a parsed config.
///
/// Returns `(errors, warnings)`: errors stop the engine from starting,
/// warnings are logged.
pub fn validate_physical_ranges(
    config: &super::EngineConfig,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let bounds = &config.sensor_bounds;

    // |Z| and instrument range are magnitudes
    for (name, min) in [
        ("sensor_bounds.r_min", bounds.r_min),
        ("sensor_bounds.range_min", bounds.range_min),
    ] {
        if min < 0.0 {
            errors.push(format!("{name} = {min} cannot be negative"));
        }
    }

    if bounds.r_max > bounds.range_max {
        warnings.push(ValidationWarning::suspicious(
            "sensor_bounds.r_max",
            format!(
                "sensor_bounds.r_max = {} exceeds range_max = {}, such resistances cannot be measured",
                bounds.r_max, bounds.range_max
            ),
        ));
    }

    let spike = config.temperature.spike_threshold_c;
    if spike > 20.0 {
        warnings.push(ValidationWarning::suspicious(
            "temperature.spike_threshold_c",
            format!("temperature.spike_threshold_c = {spike:.1} will hide thermal runaway between sweep points"),
        ));
    }

    let deviation = config.session_defaults.deviation_percent;
    if deviation > 0.0 && deviation < 1.0 {
        warnings.push(ValidationWarning::suspicious(
            "session_defaults.deviation_percent",
            format!("session_defaults.deviation_percent = {deviation} will flag almost every sample"),
        ));
    }

    (errors, warnings)
}
