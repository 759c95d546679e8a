//! The client trait every LLM backend implements.

use crate::types::{LlmRequest, LlmResponse};

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error taxonomy. `is_transient` drives the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// Stable kind string, recorded on agent-error events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestFailed(_) => "request_failed",
            Self::AuthFailed(_) => "auth_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::ContextOverflow(_) => "context_overflow",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One completion per call: a full message list and tool schemas in, one
/// assistant message plus a metrics snapshot out.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, recorded in the agent descriptor.
    fn model(&self) -> &str;

    async fn complete(&self, request: LlmRequest) -> LlmResult<LlmResponse>;
}
