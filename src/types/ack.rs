//! Engine requests and acknowledgements

use serde::{Deserialize, Serialize};

use super::{Sample, SessionMeta};

/// Session status reported in an [`Ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::InProgress => write!(f, "IN_PROGRESS"),
            SessionStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Result returned by every successful engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
    pub status: SessionStatus,
}

impl Ack {
    pub fn in_progress(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status: SessionStatus::InProgress,
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status: SessionStatus::Completed,
        }
    }
}

/// A transport-level request. Payloads are optional so that a caller
/// sending `null` gets a validation error instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum EngineRequest {
    StartSession {
        #[serde(default)]
        meta: Option<SessionMeta>,
    },
    PushSample {
        #[serde(default)]
        sample: Option<Sample>,
    },
    EndSession,
}

impl EngineRequest {
    /// Short operation name for logs.
    pub fn op_name(&self) -> &'static str {
        match self {
            EngineRequest::StartSession { .. } => "StartSession",
            EngineRequest::PushSample { .. } => "PushSample",
            EngineRequest::EndSession => "EndSession",
        }
    }
}
