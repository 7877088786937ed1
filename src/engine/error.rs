//! Typed engine failures

use std::fmt;

use crate::storage::StorageError;

/// Bad input from the caller. Safe to retry with corrected input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    /// Name of the offending field
    pub field: String,
    /// Offending value, rendered as text
    pub value: String,
}

impl ValidationError {
    pub fn new(
        message: impl Into<String>,
        field: impl Into<String>,
        value: impl fmt::Display,
    ) -> Self {
        Self {
            message: message.into(),
            field: field.into(),
            value: value.to_string(),
        }
    }

    pub(crate) fn no_active_session() -> Self {
        Self::new("No active session", "session", "none")
    }
}

/// Unexpected internal failure. The sample should be treated as lost.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProcessingError {
    pub message: String,
    /// Diagnostic detail for logs
    pub detail: String,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

impl From<StorageError> for ProcessingError {
    fn from(err: StorageError) -> Self {
        Self {
            message: format!("Processing error: {err}"),
            detail: format!("{err:?}"),
        }
    }
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Processing,
    Storage,
}

/// Failure returned by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Processing(#[from] ProcessingError),

    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Processing(_) => ErrorKind::Processing,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// The validation payload, if this is a validation failure.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            EngineError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err: EngineError = ValidationError::new("bad", "SocPercent", 101).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.as_validation().map(|v| v.value.as_str()), Some("101"));

        let err = EngineError::Storage(StorageError::SessionClosed);
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.as_validation().is_none());
    }

    #[test]
    fn test_storage_failure_becomes_processing_error() {
        let err = ProcessingError::from(StorageError::Backend("disk full".to_string()));
        assert_eq!(err.message, "Processing error: storage backend error: disk full");
        assert!(err.detail.contains("Backend"));
    }
}
