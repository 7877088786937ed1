//! Session Storage
//!
//! The engine persists accepted samples, rejects and analytics events through
//! the [`SessionStorage`] trait so different backends can be swapped without
//! touching the engine:
//! - `FileStorageProvider`: one directory of CSV files per session
//! - `InMemoryStorageProvider`: inspectable store for tests and dry runs
//!
//! A [`StorageProvider`] opens one storage instance per session, scoped to
//! (BatteryId, TestId, SocPercent).

mod file;
mod memory;

pub use file::{FileSessionStorage, FileStorageProvider, SessionManifest};
pub use memory::{
    AnalyticsRecord, FailOn, InMemorySessionStorage, InMemoryStorageProvider, RecordedSession,
    RejectRecord,
};

use std::path::{Path, PathBuf};

use crate::types::{Sample, SessionMeta};

/// Storage scoped to one active session.
///
/// Calls arrive from inside the engine's critical section, one at a time.
/// Implementations must not assume any other concurrent writer.
pub trait SessionStorage: Send {
    /// Prepare the session's output (files, tables, ...)
    fn initialize_session(&mut self, meta: &SessionMeta) -> Result<(), StorageError>;

    /// Persist an accepted sample
    fn store_sample(&mut self, sample: &Sample) -> Result<(), StorageError>;

    /// Persist a rejected sample with its reason and raw representation
    fn store_rejected_sample(&mut self, reason: &str, raw: &str) -> Result<(), StorageError>;

    /// Persist one analytics record
    fn store_analytics_event(
        &mut self,
        alert_type: &str,
        message: &str,
        value: f64,
        threshold: f64,
    ) -> Result<(), StorageError>;

    /// Flush and mark the session complete
    fn finalize_session(&mut self) -> Result<(), StorageError>;

    /// Directory (or logical location) the session writes to
    fn session_directory(&self) -> &Path;

    /// Number of accepted samples stored so far
    fn sample_count(&self) -> u64;

    /// Release underlying resources. Further calls fail with `SessionClosed`.
    fn close(&mut self) -> Result<(), StorageError>;
}

/// Factory for per-session storage.
///
/// Implementations must be thread-safe (Send + Sync) so the engine can be
/// shared across tasks.
pub trait StorageProvider: Send + Sync {
    /// Open storage for the session described by `meta`
    fn open_session(&self, meta: &SessionMeta) -> Result<Box<dyn SessionStorage>, StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Session output location: `<root>/<BatteryId>/<TestId>/<Soc>%`.
pub fn session_directory_for(root: &Path, meta: &SessionMeta) -> PathBuf {
    root.join(&meta.battery_id)
        .join(&meta.test_id)
        .join(format!("{}%", meta.soc_percent))
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("session storage already closed")]
    SessionClosed,

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_directory_layout() {
        let meta = SessionMeta::new("B03", "Test_2", 45, 0.05, 0.5, 10.0);
        let dir = session_directory_for(Path::new("/data/out"), &meta);
        assert_eq!(dir, PathBuf::from("/data/out/B03/Test_2/45%"));
    }

    #[test]
    fn test_trait_object() {
        let provider: Box<dyn StorageProvider> = Box::new(InMemoryStorageProvider::new());
        assert_eq!(provider.backend_name(), "InMemory");
        let meta = SessionMeta::new("B01", "Test_1", 50, 0.05, 0.5, 10.0);
        let mut storage = provider.open_session(&meta).unwrap();
        storage.initialize_session(&meta).unwrap();
        storage
            .store_sample(&Sample::new(10.0, 1.0, 0.0, 3.7, 25.0, 10.0, 1))
            .unwrap();
        assert_eq!(storage.sample_count(), 1);
    }
}
