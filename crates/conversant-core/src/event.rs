//! The event model: a tagged union over everything that can happen in a
//! conversation, with stable ids and JSON serialization derived from the tag.

use chrono::{DateTime, Utc};
use conversant_llm::{Content, MetricsSnapshot, Role, ToolSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::state::ConversationId;

/// Wire-level name of the tool that signals end-of-task. The action kind in
/// the event model is canonical; dispatch maps this name onto it.
pub const FINISH_TOOL: &str = "finish";

/// Wire-level name of the pure-logging tool.
pub const THINK_TOOL: &str = "think";

/// Stable event identifier, unique within a conversation.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Arc<str>);

impl EventId {
    pub fn new() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical id of one tool call, assigned by the LLM.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallId(Arc<str>);

impl ToolCallId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ToolCallId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Groups sibling actions emitted in the same LLM turn.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LlmResponseId(Arc<str>);

impl LlmResponseId {
    pub fn new() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LlmResponseId {
    fn default() -> Self {
        Self::new()
    }
}

/// Who produced an event.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Agent,
    User,
    Environment,
}

/// An event: immutable once appended, totally ordered by log offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Kind-specific body, discriminated by `kind` in the JSON document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    SystemPrompt(SystemPromptEvent),
    Message(MessageEvent),
    Action(ActionEvent),
    Observation(ObservationEvent),
    AgentError(AgentErrorEvent),
    UserReject(UserRejectObservation),
    Pause,
    CondensationRequest,
    Condensation(Condensation),
}

/// System prompt plus the tool schemas visible to the LLM at that point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemPromptEvent {
    pub system_prompt: String,
    pub tools: Vec<ToolSchema>,
}

/// A user- or agent-origin message with ordered content parts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEvent {
    pub role: Role,
    pub content: Vec<Content>,
    /// Knowledge microagents activated by this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub microagents: Vec<String>,
    /// Set when the message was routed from a delegated child conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_conversation: Option<ConversationId>,
}

/// An agent-originated tool invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionEvent {
    pub tool_name: String,
    pub tool_call_id: ToolCallId,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub llm_response_id: LlmResponseId,
    /// Attached to the last action of an LLM turn only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

/// The environment's reply to a specific action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservationEvent {
    pub tool_name: String,
    pub action_id: ToolCallId,
    pub output: String,
    /// Structured executor output, when the tool produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// A non-fatal scaffold-level error surfaced to the LLM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentErrorEvent {
    pub error_kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ToolCallId>,
}

/// Reply to an action the user rejected in confirmation mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRejectObservation {
    pub tool_name: String,
    pub action_id: ToolCallId,
    pub rejection_reason: String,
}

/// Marks earlier events as forgotten for view purposes and optionally splices
/// in a summary. The underlying log is never rewritten.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condensation {
    pub forgotten_event_ids: Vec<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_offset: Option<usize>,
}

impl Event {
    fn new(source: EventSource, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            source,
            payload,
        }
    }

    pub fn system_prompt(system_prompt: impl Into<String>, tools: Vec<ToolSchema>) -> Self {
        Self::new(
            EventSource::Agent,
            EventPayload::SystemPrompt(SystemPromptEvent {
                system_prompt: system_prompt.into(),
                tools,
            }),
        )
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self::new(
            EventSource::User,
            EventPayload::Message(MessageEvent {
                role: Role::User,
                content: vec![Content::text(text)],
                microagents: Vec::new(),
                sender_conversation: None,
            }),
        )
    }

    pub fn agent_message(content: Vec<Content>) -> Self {
        Self::new(
            EventSource::Agent,
            EventPayload::Message(MessageEvent {
                role: Role::Assistant,
                content,
                microagents: Vec::new(),
                sender_conversation: None,
            }),
        )
    }

    /// User-role message routed from a delegated child conversation.
    pub fn child_message(child: ConversationId, text: impl Into<String>) -> Self {
        Self::new(
            EventSource::Environment,
            EventPayload::Message(MessageEvent {
                role: Role::User,
                content: vec![Content::text(text)],
                microagents: Vec::new(),
                sender_conversation: Some(child),
            }),
        )
    }

    pub fn action(action: ActionEvent) -> Self {
        Self::new(EventSource::Agent, EventPayload::Action(action))
    }

    pub fn observation(observation: ObservationEvent) -> Self {
        Self::new(EventSource::Environment, EventPayload::Observation(observation))
    }

    pub fn agent_error(error_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            EventSource::Environment,
            EventPayload::AgentError(AgentErrorEvent {
                error_kind: error_kind.into(),
                message: message.into(),
                action_id: None,
            }),
        )
    }

    pub fn user_reject(
        tool_name: impl Into<String>,
        action_id: ToolCallId,
        rejection_reason: impl Into<String>,
    ) -> Self {
        Self::new(
            EventSource::User,
            EventPayload::UserReject(UserRejectObservation {
                tool_name: tool_name.into(),
                action_id,
                rejection_reason: rejection_reason.into(),
            }),
        )
    }

    pub fn pause() -> Self {
        Self::new(EventSource::User, EventPayload::Pause)
    }

    pub fn condensation_request() -> Self {
        Self::new(EventSource::User, EventPayload::CondensationRequest)
    }

    pub fn condensation(condensation: Condensation) -> Self {
        Self::new(EventSource::Environment, EventPayload::Condensation(condensation))
    }

    pub fn as_action(&self) -> Option<&ActionEvent> {
        match &self.payload {
            EventPayload::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_observation(&self) -> Option<&ObservationEvent> {
        match &self.payload {
            EventPayload::Observation(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageEvent> {
        match &self.payload {
            EventPayload::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_condensation(&self) -> Option<&Condensation> {
        match &self.payload {
            EventPayload::Condensation(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_finish_action(&self) -> bool {
        self.as_action()
            .map(|a| a.tool_name == FINISH_TOOL)
            .unwrap_or(false)
    }

    pub fn is_agent_error(&self) -> bool {
        matches!(self.payload, EventPayload::AgentError(_))
    }
}
