//! In-memory session storage for testing and dry runs
//!
//! Every session opened through an [`InMemoryStorageProvider`] is recorded in
//! a shared list that stays inspectable after the engine has released the
//! storage. Failures can be injected per operation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{session_directory_for, SessionStorage, StorageError, StorageProvider};
use crate::types::{Sample, SessionMeta};

/// Storage operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    Open,
    Initialize,
    StoreSample,
    StoreRejected,
    StoreAnalytics,
    Finalize,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectRecord {
    pub reason: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsRecord {
    pub alert_type: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// Everything one storage instance received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSession {
    pub meta: SessionMeta,
    pub directory: PathBuf,
    pub initialized: bool,
    pub samples: Vec<Sample>,
    pub rejects: Vec<RejectRecord>,
    pub events: Vec<AnalyticsRecord>,
    pub finalized: bool,
    pub closed: bool,
}

impl RecordedSession {
    /// Analytics records with the given alert type.
    pub fn events_of(&self, alert_type: &str) -> Vec<&AnalyticsRecord> {
        self.events
            .iter()
            .filter(|e| e.alert_type == alert_type)
            .collect()
    }
}

type SharedSessions = Arc<Mutex<Vec<RecordedSession>>>;
type SharedFailures = Arc<Mutex<HashSet<FailOn>>>;

/// Provider whose sessions live in memory.
///
/// Cloning shares the same record list, so a test can keep a handle while
/// the engine owns another.
#[derive(Debug, Clone)]
pub struct InMemoryStorageProvider {
    root: PathBuf,
    sessions: SharedSessions,
    failures: SharedFailures,
}

impl InMemoryStorageProvider {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("memory"),
            sessions: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Snapshot of every session opened so far, oldest first.
    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.sessions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the most recently opened session.
    pub fn last_session(&self) -> Option<RecordedSession> {
        self.sessions().pop()
    }

    /// Make every subsequent call of `op` fail until cleared.
    pub fn fail_on(&self, op: FailOn) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }
}

impl Default for InMemoryStorageProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn check_failure(failures: &SharedFailures, op: FailOn) -> Result<(), StorageError> {
    let failures = failures
        .lock()
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    if failures.contains(&op) {
        return Err(StorageError::Backend(format!("injected failure on {op:?}")));
    }
    Ok(())
}

impl StorageProvider for InMemoryStorageProvider {
    fn open_session(&self, meta: &SessionMeta) -> Result<Box<dyn SessionStorage>, StorageError> {
        check_failure(&self.failures, FailOn::Open)?;

        let directory = session_directory_for(&self.root, meta);
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        sessions.push(RecordedSession {
            meta: meta.clone(),
            directory: directory.clone(),
            initialized: false,
            samples: Vec::new(),
            rejects: Vec::new(),
            events: Vec::new(),
            finalized: false,
            closed: false,
        });

        Ok(Box::new(InMemorySessionStorage {
            index: sessions.len() - 1,
            directory,
            sample_count: 0,
            closed: false,
            sessions: Arc::clone(&self.sessions),
            failures: Arc::clone(&self.failures),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

/// Storage handle writing into one [`RecordedSession`].
#[derive(Debug)]
pub struct InMemorySessionStorage {
    index: usize,
    directory: PathBuf,
    sample_count: u64,
    closed: bool,
    sessions: SharedSessions,
    failures: SharedFailures,
}

impl InMemorySessionStorage {
    fn with_record<F>(&mut self, op: FailOn, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut RecordedSession),
    {
        if self.closed {
            return Err(StorageError::SessionClosed);
        }
        check_failure(&self.failures, op)?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let record = sessions
            .get_mut(self.index)
            .ok_or_else(|| StorageError::Backend("session record missing".to_string()))?;
        f(record);
        Ok(())
    }
}

impl SessionStorage for InMemorySessionStorage {
    fn initialize_session(&mut self, meta: &SessionMeta) -> Result<(), StorageError> {
        self.with_record(FailOn::Initialize, |r| {
            r.meta = meta.clone();
            r.initialized = true;
        })
    }

    fn store_sample(&mut self, sample: &Sample) -> Result<(), StorageError> {
        self.with_record(FailOn::StoreSample, |r| r.samples.push(sample.clone()))?;
        self.sample_count += 1;
        Ok(())
    }

    fn store_rejected_sample(&mut self, reason: &str, raw: &str) -> Result<(), StorageError> {
        self.with_record(FailOn::StoreRejected, |r| {
            r.rejects.push(RejectRecord {
                reason: reason.to_string(),
                raw: raw.to_string(),
            });
        })
    }

    fn store_analytics_event(
        &mut self,
        alert_type: &str,
        message: &str,
        value: f64,
        threshold: f64,
    ) -> Result<(), StorageError> {
        self.with_record(FailOn::StoreAnalytics, |r| {
            r.events.push(AnalyticsRecord {
                alert_type: alert_type.to_string(),
                message: message.to_string(),
                value,
                threshold,
            });
        })
    }

    fn finalize_session(&mut self) -> Result<(), StorageError> {
        self.with_record(FailOn::Finalize, |r| r.finalized = true)
    }

    fn session_directory(&self) -> &Path {
        &self.directory
    }

    fn sample_count(&self) -> u64 {
        self.sample_count
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.with_record(FailOn::Close, |r| r.closed = true)?;
        self.closed = true;
        Ok(())
    }
}
