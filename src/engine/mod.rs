//! Session Engine
//!
//! Owns the single active session and serializes every operation on it.
//!
//! ## Lifecycle
//!
//! `Idle --StartSession--> Active --EndSession--> Idle`
//!
//! Validation and processing failures during `PushSample` are reported to the
//! caller but never leave the `Active` phase. `StartSession` while `Active`
//! replaces the running session; the old storage is released without being
//! finalized.
//!
//! ## Concurrency
//!
//! All three operations run under one `Mutex`. Storage calls and listener
//! dispatch happen inside the critical section, so a slow backend or listener
//! stalls ingestion. There is no timeout on storage calls.

mod detectors;
mod error;
mod listeners;
mod session;
mod validation;

pub use detectors::{band_bounds, band_violation, delta_exceeding, fold_mean, Delta};
pub use error::{EngineError, ErrorKind, ProcessingError, ValidationError};
pub use listeners::{EventListener, TracingListener};
pub use session::{RunningState, SessionPhase, SessionSnapshot};
pub use validation::{validate_meta, validate_sample};

use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::storage::StorageProvider;
use crate::types::{Ack, EngineEvent, EngineRequest, Sample, SessionMeta};
use listeners::Listeners;
use session::ActiveSession;

struct EngineInner {
    session: Option<ActiveSession>,
    listeners: Listeners,
}

/// Streaming analytics engine for one battery test session at a time.
///
/// `SessionEngine` is `Send + Sync`; share it behind an `Arc` and call it
/// from any thread. Overlapping calls block until the current one finishes.
pub struct SessionEngine {
    config: EngineConfig,
    provider: Box<dyn StorageProvider>,
    inner: Mutex<EngineInner>,
}

impl SessionEngine {
    pub fn new(config: EngineConfig, provider: impl StorageProvider + 'static) -> Self {
        info!(backend = provider.backend_name(), "Session engine ready");
        Self {
            config,
            provider: Box::new(provider),
            inner: Mutex::new(EngineInner {
                session: None,
                listeners: Listeners::default(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a listener. Listeners are called in registration order.
    pub fn subscribe(&self, listener: impl EventListener + 'static) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.listeners.push(Box::new(listener));
        debug!(listeners = inner.listeners.len(), "Listener registered");
        Ok(())
    }

    /// Open a new session.
    pub fn start_session(&self, meta: SessionMeta) -> Result<Ack, EngineError> {
        self.start(Some(meta))
    }

    /// Validate, analyse and persist one sample.
    pub fn push_sample(&self, sample: Sample) -> Result<Ack, EngineError> {
        self.push(Some(sample))
    }

    /// Finalize and release the active session.
    pub fn end_session(&self) -> Result<Ack, EngineError> {
        let mut inner = self.lock()?;
        let EngineInner { session, listeners } = &mut *inner;

        let Some(active) = session.as_mut() else {
            return Err(ValidationError::no_active_session().into());
        };

        // On failure the session stays active so the caller can retry
        active
            .storage
            .finalize_session()
            .map_err(EngineError::Storage)?;

        let Some(active) = session.take() else {
            return Err(ValidationError::no_active_session().into());
        };
        let accepted = active.running.accepted_count;
        info!(
            battery_id = %active.meta.battery_id,
            test_id = %active.meta.test_id,
            soc = active.meta.soc_percent,
            accepted,
            rejected = active.running.rejected_count,
            "Session completed"
        );
        listeners.dispatch(&EngineEvent::SessionCompleted {
            battery_id: active.meta.battery_id.clone(),
            test_id: active.meta.test_id.clone(),
            soc_percent: active.meta.soc_percent,
            accepted_count: accepted,
            message: format!("{accepted} samples processed successfully"),
        });
        active.teardown();

        Ok(Ack::completed("Session completed"))
    }

    /// Dispatch a transport-level request.
    pub fn handle(&self, request: EngineRequest) -> Result<Ack, EngineError> {
        match request {
            EngineRequest::StartSession { meta } => self.start(meta),
            EngineRequest::PushSample { sample } => self.push(sample),
            EngineRequest::EndSession => self.end_session(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.snapshot().phase
    }

    /// Current state. Readable even if the state lock is poisoned.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .session
            .as_ref()
            .map_or_else(SessionSnapshot::idle, ActiveSession::snapshot)
    }

    fn start(&self, meta: Option<SessionMeta>) -> Result<Ack, EngineError> {
        let mut inner = self.lock()?;
        let EngineInner { session, listeners } = &mut *inner;

        let meta = validate_meta(meta).map_err(|e| {
            warn!(field = %e.field, value = %e.value, "{}", e.message);
            e
        })?;

        let mut storage = self
            .provider
            .open_session(&meta)
            .map_err(EngineError::Storage)?;

        // A session writing into the same directory must be flushed and closed
        // before initialization truncates its files.
        if session
            .as_ref()
            .is_some_and(|previous| previous.storage.session_directory() == storage.session_directory())
        {
            replace_session(session.take());
        }

        if let Err(e) = storage.initialize_session(&meta) {
            if let Err(close_err) = storage.close() {
                warn!(error = %close_err, "Failed to release storage after init failure");
            }
            return Err(EngineError::Storage(e));
        }

        replace_session(session.take());

        info!(
            battery_id = %meta.battery_id,
            test_id = %meta.test_id,
            soc = meta.soc_percent,
            dir = %storage.session_directory().display(),
            "Session started"
        );
        let started = EngineEvent::SessionStarted {
            battery_id: meta.battery_id.clone(),
            test_id: meta.test_id.clone(),
            soc_percent: meta.soc_percent,
            message: format!(
                "Receiving {} / {} at {}% SoC",
                meta.battery_id, meta.test_id, meta.soc_percent
            ),
        };
        *session = Some(ActiveSession::new(meta, storage));
        listeners.dispatch(&started);

        Ok(Ack::in_progress("Session started"))
    }

    fn push(&self, sample: Option<Sample>) -> Result<Ack, EngineError> {
        let mut inner = self.lock()?;
        let EngineInner { session, listeners } = &mut *inner;

        let Some(active) = session.as_mut() else {
            return Err(ValidationError::no_active_session().into());
        };

        let Some(sample) = sample else {
            let err = ValidationError::new("Sample is null", "sample", "null");
            active.record_rejection(&err.message, "<null>");
            return Err(err.into());
        };

        if let Err(err) = validate_sample(&sample) {
            active.record_rejection(&err.message, &sample.raw_representation());
            return Err(err.into());
        }

        match active.process(&sample, &self.config, listeners) {
            Ok(outcome) => {
                debug!(
                    row_index = sample.row_index,
                    impedance = outcome.impedance,
                    anomalies = outcome.anomalies,
                    "Sample processed"
                );
                Ok(Ack::in_progress("Sample accepted"))
            }
            Err(err) => {
                warn!(row_index = sample.row_index, detail = %err.detail, "{}", err.message);
                active.record_rejection(&err.message, &sample.raw_representation());
                Err(err.into())
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineInner>, EngineError> {
        self.inner.lock().map_err(|e| {
            ProcessingError::new("Engine state lock poisoned", e.to_string()).into()
        })
    }
}

fn replace_session(previous: Option<ActiveSession>) {
    let Some(previous) = previous else {
        return;
    };
    warn!(
        battery_id = %previous.meta.battery_id,
        test_id = %previous.meta.test_id,
        soc = previous.meta.soc_percent,
        accepted = previous.running.accepted_count,
        "Replacing active session without finalizing it"
    );
    previous.teardown();
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        let inner = self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = inner.session.take() {
            warn!(
                battery_id = %active.meta.battery_id,
                "Engine dropped with an active session, releasing storage"
            );
            active.teardown();
        }
    }
}
