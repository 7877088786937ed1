//! EIS file ingestion
//!
//! Upstream helpers that turn instrument exports into engine input:
//! - `EisCsvReader`: header sniffing, row numbering, rejects log
//! - `discover_eis_files`: locate exports and derive battery / test / SoC
//! - `count_csv_rows`: expected sample count for session metadata

mod discovery;
mod reader;

pub use discovery::{count_csv_rows, discover_eis_files, EisFileInfo};
pub use reader::{is_header_line, EisCsvReader};

use std::path::PathBuf;

/// File ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("CSV file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Base path does not exist: {}", .0.display())]
    MissingBase(PathBuf),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid discovery pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }
}
