//! Ingestion Pipeline Module
//!
//! ```text
//! RequestSource (CSV replay | stdin JSON)
//!     -> ProcessingLoop (select! on cancellation)
//!     -> SessionEngine::handle (blocking pool)
//! ```

pub mod processing_loop;
pub mod source;

pub use processing_loop::{LoopStats, ProcessingLoop};
pub use source::{CsvReplaySource, RequestSource, SourceEvent, StdinSource};
