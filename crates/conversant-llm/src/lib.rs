//! Conversant LLM contract: message shapes, the client trait, and retry policy.
//!
//! The actual provider transport (HTTP, streaming, token accounting) lives
//! outside this workspace. This crate defines what the engine sends to a
//! model and what it gets back, plus a retry wrapper so the engine only ever
//! sees one success or one typed failure per call.

pub mod client;
pub mod retry;
pub mod scripted;
pub mod types;

pub use client::{LlmClient, LlmError, LlmResult};
pub use retry::{RetryPolicy, RetryingClient};
pub use scripted::ScriptedClient;
pub use types::{
    AssistantMessage, Content, LlmMessage, LlmRequest, LlmResponse, MetricsSnapshot, Role,
    SamplingParams, ToolCall, ToolSchema,
};
