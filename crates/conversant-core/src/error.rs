//! Error types surfaced to SDK callers.
//!
//! Only problems that make the log itself untrustworthy (or the caller's own
//! misuse) escape as errors; everything the agent can react to becomes an
//! event in the log instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("log corruption at offset {offset}: {reason}")]
    LogCorruption { offset: usize, reason: String },

    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("schema validation failed for {tool} at {path}: {detail}")]
    SchemaValidationFailed {
        tool: String,
        path: String,
        detail: String,
    },

    #[error("workspace unavailable: {reason}")]
    WorkspaceUnavailable { reason: String },

    #[error("llm failure: {kind}")]
    LlmFailure { kind: String },

    #[error("conversation closed")]
    ConversationClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn corruption(offset: usize, reason: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            reason: reason.into(),
        }
    }

    pub fn workspace_unavailable(reason: impl Into<String>) -> Self {
        Self::WorkspaceUnavailable {
            reason: reason.into(),
        }
    }

    pub fn llm_failure(kind: impl Into<String>) -> Self {
        Self::LlmFailure { kind: kind.into() }
    }
}
