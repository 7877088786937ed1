//! EIS export discovery
//!
//! Two layouts are recognised under a base directory:
//!
//! - Flat Hioki exports named `Hk_<anything>_SoC_<n>_<anything>.csv`, found at
//!   any depth. They carry no battery or test id and are filed under
//!   `B01` / `Test_1`.
//! - Structured trees `B<nn>/.../<dir containing EIS>/Test_<x>/<soc>[%].csv`,
//!   where the SoC is the first digit run of the file stem and must be a
//!   multiple of 5.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::{is_header_line, IngestError};
use crate::config::defaults;
use crate::config::SessionDefaults;
use crate::types::SessionMeta;

/// One discovered export and the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EisFileInfo {
    pub battery_id: String,
    pub test_id: String,
    pub soc_percent: i32,
    pub path: PathBuf,
    pub file_name: String,
}

impl EisFileInfo {
    /// Session metadata for replaying this file with the given thresholds.
    pub fn session_meta(&self, thresholds: &SessionDefaults) -> SessionMeta {
        let total_rows = i64::try_from(count_csv_rows(&self.path)).unwrap_or(i64::MAX);
        SessionMeta::new(
            self.battery_id.clone(),
            self.test_id.clone(),
            self.soc_percent,
            thresholds.v_threshold,
            thresholds.z_threshold,
            thresholds.deviation_percent,
        )
        .with_source(self.file_name.clone(), total_rows)
    }
}

struct SocPatterns {
    hioki: Regex,
    battery_dir: Regex,
    leading_number: Regex,
}

impl SocPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            hioki: Regex::new(r"Hk_.*_SoC_(\d+)_")?,
            battery_dir: Regex::new(r"^B\d{2}$")?,
            leading_number: Regex::new(r"(\d+)%?")?,
        })
    }

    fn hioki_soc(&self, stem: &str) -> Option<i32> {
        let soc: i32 = self.hioki.captures(stem)?.get(1)?.as_str().parse().ok()?;
        (defaults::DISCOVERY_SOC_MIN..=defaults::DISCOVERY_SOC_MAX)
            .contains(&soc)
            .then_some(soc)
    }

    fn layout_soc(&self, stem: &str) -> Option<i32> {
        let soc: i32 = self
            .leading_number
            .captures(stem)?
            .get(1)?
            .as_str()
            .parse()
            .ok()?;
        let in_range = (defaults::DISCOVERY_SOC_MIN..=defaults::DISCOVERY_SOC_MAX).contains(&soc);
        (in_range && soc % defaults::DISCOVERY_SOC_STEP == 0).then_some(soc)
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("csv"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn entry_name(entry: &DirEntry) -> String {
    entry.file_name().to_string_lossy().into_owned()
}

/// Walk `root` and yield readable entries; unreadable ones are logged.
fn walk(root: &Path, min_depth: usize, max_depth: usize) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .min_depth(min_depth)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                None
            }
        })
}

/// Find every EIS export under `base`, sorted by battery, test and SoC.
pub fn discover_eis_files(base: &Path) -> Result<Vec<EisFileInfo>, IngestError> {
    if !base.is_dir() {
        return Err(IngestError::MissingBase(base.to_path_buf()));
    }
    let patterns = SocPatterns::new()?;
    let mut files = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    // Flat Hioki exports
    for entry in walk(base, 1, usize::MAX) {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_csv(path) {
            continue;
        }
        let stem = file_stem(path);
        if !stem.starts_with("Hk_") {
            continue;
        }
        if let Some(soc) = patterns.hioki_soc(&stem) {
            seen.insert(path.to_path_buf());
            files.push(EisFileInfo {
                battery_id: defaults::HIOKI_BATTERY_ID.to_string(),
                test_id: defaults::HIOKI_TEST_ID.to_string(),
                soc_percent: soc,
                path: path.to_path_buf(),
                file_name: entry_name(&entry),
            });
        }
    }

    // B<nn> / *EIS* / Test_* / *.csv
    let battery_dirs = walk(base, 1, usize::MAX)
        .filter(|e| e.file_type().is_dir() && patterns.battery_dir.is_match(&entry_name(e)));
    for battery_dir in battery_dirs {
        let battery_id = entry_name(&battery_dir);

        let eis_dirs = walk(battery_dir.path(), 1, usize::MAX)
            .filter(|e| e.file_type().is_dir() && entry_name(e).to_uppercase().contains("EIS"));
        for eis_dir in eis_dirs {
            let test_dirs = walk(eis_dir.path(), 1, 1)
                .filter(|e| e.file_type().is_dir() && entry_name(e).starts_with("Test_"));
            for test_dir in test_dirs {
                let test_id = entry_name(&test_dir);

                for csv in walk(test_dir.path(), 1, 1) {
                    let path = csv.path();
                    if !csv.file_type().is_file() || !is_csv(path) || seen.contains(path) {
                        continue;
                    }
                    if let Some(soc) = patterns.layout_soc(&file_stem(path)) {
                        seen.insert(path.to_path_buf());
                        files.push(EisFileInfo {
                            battery_id: battery_id.clone(),
                            test_id: test_id.clone(),
                            soc_percent: soc,
                            path: path.to_path_buf(),
                            file_name: entry_name(&csv),
                        });
                    }
                }
            }
        }
    }

    files.sort_by(|a, b| {
        a.battery_id
            .cmp(&b.battery_id)
            .then_with(|| a.test_id.cmp(&b.test_id))
            .then_with(|| a.soc_percent.cmp(&b.soc_percent))
            .then_with(|| a.path.cmp(&b.path))
    });
    debug!(base = %base.display(), count = files.len(), "EIS discovery complete");
    Ok(files)
}

/// Number of data rows in a CSV file, excluding a header line.
///
/// Returns the standard sweep length when the file cannot be read.
pub fn count_csv_rows(path: &Path) -> usize {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let mut lines = contents.lines().peekable();
            let header = lines.peek().is_some_and(|first| is_header_line(first));
            lines.count() - usize::from(header)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot count CSV rows, assuming a standard sweep");
            defaults::FALLBACK_ROW_COUNT
        }
    }
}
