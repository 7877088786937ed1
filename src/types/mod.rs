//! Shared data structures for EIS session ingestion
//!
//! - `SessionMeta`, `Sample`: the values callers push into the engine
//! - `AnomalyEvent`, `EngineEvent`: what the detector chain reports
//! - `Ack`, `EngineRequest`: the request/acknowledgement surface

mod ack;
mod event;
mod sample;

pub use ack::*;
pub use event::*;
pub use sample::*;
