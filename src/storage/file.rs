//! File-backed session storage
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/<BatteryId>/<TestId>/<Soc>%/
//!     session.json            meta, start/completion time, counts
//!     samples.csv             accepted samples
//!     rejects.csv             rejected samples with reason
//!     analytics_events.csv    anomaly records
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{session_directory_for, SessionStorage, StorageError, StorageProvider};
use crate::types::{Sample, SessionMeta, SessionStatus};

const MANIFEST_FILE: &str = "session.json";
const SAMPLES_FILE: &str = "samples.csv";
const REJECTS_FILE: &str = "rejects.csv";
const EVENTS_FILE: &str = "analytics_events.csv";

const SAMPLES_HEADER: &str =
    "RowIndex,FrequencyHz,R_ohm,X_ohm,V,T_degC,Range_ohm,Impedance,CapturedAtUtc";
const REJECTS_HEADER: &str = "Timestamp,Reason,RawData";
const EVENTS_HEADER: &str = "Timestamp,AlertType,Message,Value,Threshold";

/// Opens one [`FileSessionStorage`] per session under `root`.
#[derive(Debug, Clone)]
pub struct FileStorageProvider {
    root: PathBuf,
}

impl FileStorageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageProvider for FileStorageProvider {
    fn open_session(&self, meta: &SessionMeta) -> Result<Box<dyn SessionStorage>, StorageError> {
        let dir = session_directory_for(&self.root, meta);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        debug!(dir = %dir.display(), "Opened session directory");
        Ok(Box::new(FileSessionStorage::new(dir)))
    }

    fn backend_name(&self) -> &'static str {
        "File"
    }
}

/// Contents of `session.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub meta: SessionMeta,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub sample_count: u64,
    pub rejected_count: u64,
    pub event_count: u64,
}

impl SessionManifest {
    /// Read a manifest back from a session directory.
    pub fn load(session_dir: &Path) -> Result<Self, StorageError> {
        let path = session_dir.join(MANIFEST_FILE);
        let contents = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

struct SessionFiles {
    samples: BufWriter<File>,
    rejects: BufWriter<File>,
    events: BufWriter<File>,
}

/// CSV-file storage for one session directory.
pub struct FileSessionStorage {
    dir: PathBuf,
    manifest: Option<SessionManifest>,
    files: Option<SessionFiles>,
    closed: bool,
    sample_count: u64,
    rejected_count: u64,
    event_count: u64,
}

impl FileSessionStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            manifest: None,
            files: None,
            closed: false,
            sample_count: 0,
            rejected_count: 0,
            event_count: 0,
        }
    }

    fn create_csv(&self, name: &str, header: &str) -> Result<BufWriter<File>, StorageError> {
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(|e| StorageError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{header}").map_err(|e| StorageError::io(&path, e))?;
        Ok(writer)
    }

    fn files(&mut self) -> Result<&mut SessionFiles, StorageError> {
        if self.closed {
            return Err(StorageError::SessionClosed);
        }
        self.files
            .as_mut()
            .ok_or_else(|| StorageError::Backend("session not initialized".to_string()))
    }

    fn write_manifest(&self) -> Result<(), StorageError> {
        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fs::write(&path, json).map_err(|e| StorageError::io(&path, e))
    }

    fn flush_all(&mut self) -> Result<(), StorageError> {
        let dir = self.dir.clone();
        if let Some(files) = self.files.as_mut() {
            files.samples.flush().map_err(|e| StorageError::io(dir.join(SAMPLES_FILE), e))?;
            files.rejects.flush().map_err(|e| StorageError::io(dir.join(REJECTS_FILE), e))?;
            files.events.flush().map_err(|e| StorageError::io(dir.join(EVENTS_FILE), e))?;
        }
        Ok(())
    }
}

impl SessionStorage for FileSessionStorage {
    fn initialize_session(&mut self, meta: &SessionMeta) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::SessionClosed);
        }
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;

        self.files = Some(SessionFiles {
            samples: self.create_csv(SAMPLES_FILE, SAMPLES_HEADER)?,
            rejects: self.create_csv(REJECTS_FILE, REJECTS_HEADER)?,
            events: self.create_csv(EVENTS_FILE, EVENTS_HEADER)?,
        });
        self.sample_count = 0;
        self.rejected_count = 0;
        self.event_count = 0;
        self.manifest = Some(SessionManifest {
            meta: meta.clone(),
            status: SessionStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            sample_count: 0,
            rejected_count: 0,
            event_count: 0,
        });
        self.write_manifest()?;

        info!(dir = %self.dir.display(), "Session storage initialized");
        Ok(())
    }

    fn store_sample(&mut self, sample: &Sample) -> Result<(), StorageError> {
        let path = self.dir.join(SAMPLES_FILE);
        let captured = sample
            .captured_at_utc
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let files = self.files()?;
        writeln!(
            files.samples,
            "{},{},{},{},{},{},{},{},{}",
            sample.row_index,
            sample.frequency_hz,
            sample.r_ohm,
            sample.x_ohm,
            sample.v,
            sample.t_deg_c,
            sample.range_ohm,
            sample.impedance(),
            captured
        )
        .map_err(|e| StorageError::io(&path, e))?;
        self.sample_count += 1;
        Ok(())
    }

    fn store_rejected_sample(&mut self, reason: &str, raw: &str) -> Result<(), StorageError> {
        let path = self.dir.join(REJECTS_FILE);
        let files = self.files()?;
        writeln!(
            files.rejects,
            "{},{},{}",
            Utc::now().to_rfc3339(),
            csv_field(reason),
            csv_field(raw)
        )
        .and_then(|()| files.rejects.flush())
        .map_err(|e| StorageError::io(&path, e))?;
        self.rejected_count += 1;
        Ok(())
    }

    fn store_analytics_event(
        &mut self,
        alert_type: &str,
        message: &str,
        value: f64,
        threshold: f64,
    ) -> Result<(), StorageError> {
        let path = self.dir.join(EVENTS_FILE);
        let files = self.files()?;
        writeln!(
            files.events,
            "{},{},{},{},{}",
            Utc::now().to_rfc3339(),
            csv_field(alert_type),
            csv_field(message),
            value,
            threshold
        )
        .map_err(|e| StorageError::io(&path, e))?;
        self.event_count += 1;
        Ok(())
    }

    fn finalize_session(&mut self) -> Result<(), StorageError> {
        self.files()?;
        self.flush_all()?;

        let (samples, rejects, events) = (self.sample_count, self.rejected_count, self.event_count);
        if let Some(manifest) = self.manifest.as_mut() {
            manifest.status = SessionStatus::Completed;
            manifest.completed_at = Some(Utc::now());
            manifest.sample_count = samples;
            manifest.rejected_count = rejects;
            manifest.event_count = events;
        }
        self.write_manifest()?;

        info!(
            dir = %self.dir.display(),
            samples,
            rejects,
            events,
            "Session storage finalized"
        );
        Ok(())
    }

    fn session_directory(&self) -> &Path {
        &self.dir
    }

    fn sample_count(&self) -> u64 {
        self.sample_count
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush_all();
        self.files = None;
        self.closed = true;
        result
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_store_before_initialize_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut storage = FileSessionStorage::new(tmp.path().to_path_buf());
        let err = storage
            .store_sample(&Sample::new(10.0, 1.0, 0.0, 3.7, 25.0, 10.0, 1))
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[test]
    fn test_reject_is_flushed_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 10.0);
        let mut storage = FileSessionStorage::new(tmp.path().join("s"));
        storage.initialize_session(&meta).unwrap();
        storage
            .store_rejected_sample("Invalid R_ohm: NaN", "10,NaN,0,3.7,25,10,1")
            .unwrap();

        let contents = fs::read_to_string(tmp.path().join("s").join(REJECTS_FILE)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], REJECTS_HEADER);
        assert!(lines[1].ends_with(",Invalid R_ohm: NaN,\"10,NaN,0,3.7,25,10,1\""));
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 10.0);
        let mut storage = FileSessionStorage::new(tmp.path().to_path_buf());
        storage.initialize_session(&meta).unwrap();
        storage.close().unwrap();
        storage.close().unwrap();
        assert!(matches!(
            storage.store_analytics_event("VoltageSpike", "m", 1.0, 0.5),
            Err(StorageError::SessionClosed)
        ));
    }
}
