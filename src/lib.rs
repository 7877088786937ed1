//! EIS Analytics: streaming analytics for battery impedance test sessions
//!
//! Ingests electrochemical impedance spectroscopy samples one session at a
//! time, validates each sample, keeps running statistics and raises anomaly
//! events as samples arrive.
//!
//! ## Architecture
//!
//! - **Engine**: session state machine, validation pipeline, detector chain
//! - **Storage**: per-session persistence behind the `SessionStorage` trait
//! - **Ingest**: CSV export reading and discovery
//! - **Pipeline**: async request sources feeding the engine

pub mod config;
pub mod engine;
pub mod ingest;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::EngineConfig;

// Re-export commonly used types
pub use types::{
    Ack, AnomalyEvent, AnomalyKind, Direction, EngineEvent, EngineRequest, Sample, SessionMeta,
    SessionStatus,
};

// Re-export the engine
pub use engine::{
    EngineError, ErrorKind, EventListener, ProcessingError, SessionEngine, SessionPhase,
    SessionSnapshot, TracingListener, ValidationError,
};

// Re-export storage
pub use storage::{
    FileStorageProvider, InMemoryStorageProvider, SessionStorage, StorageError, StorageProvider,
};
