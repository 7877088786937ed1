//! Engine Configuration Module
//!
//! Service-wide sensor bounds and detector thresholds loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `EIS_CONFIG` environment variable (path to TOML file)
//! 2. `eis_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`EngineConfig`] is handed to `SessionEngine::new`; there is no
//! global instance.

mod engine_config;
pub mod defaults;
pub mod validation;

pub use engine_config::*;
