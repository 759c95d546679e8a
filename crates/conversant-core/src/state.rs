//! Conversation identity, status, and the replay fold that reconstructs
//! state from the log.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::event::{Event, EventPayload, FINISH_TOOL};
use conversant_llm::Role;

/// Agent-error kinds that terminate a conversation.
pub const STUCK_DETECTED: &str = "stuck_detected";
pub const LLM_FAILURE: &str = "llm_failure";

/// Conversation identifier.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::corruption(0, format!("bad conversation id {s:?}: {e}")))
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the conversation is in its lifecycle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Idle,
    Running,
    WaitingForConfirmation,
    Paused,
    Finished,
    Errored,
}

impl ConversationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }

    /// Whether the run loop may take another step.
    pub fn can_step(&self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }
}

/// Compact descriptor of the active agent, persisted in `state.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub model: String,
    pub system_prompt: String,
    pub tool_names: Vec<String>,
}

/// State derived from the log. Holds nothing the log does not determine.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationState {
    pub id: ConversationId,
    pub status: ConversationStatus,
    pub confirmation_mode: bool,
    /// Offset the next append will receive.
    pub next_offset: usize,
    /// Names of knowledge microagents activated so far.
    pub activated_microagents: Vec<String>,
}

impl ConversationState {
    pub fn new(id: ConversationId, confirmation_mode: bool) -> Self {
        Self {
            id,
            status: ConversationStatus::Idle,
            confirmation_mode,
            next_offset: 0,
            activated_microagents: Vec::new(),
        }
    }

    /// Apply one appended event. The engine uses the same transition the
    /// replay fold does, so live status and replayed status agree at every
    /// append boundary.
    pub fn apply(&mut self, event: &Event) {
        self.status = transition(self.status, self.confirmation_mode, event);
        if let EventPayload::Message(m) = &event.payload {
            for name in &m.microagents {
                if !self.activated_microagents.contains(name) {
                    self.activated_microagents.push(name.clone());
                }
            }
        }
        self.next_offset += 1;
    }
}

/// Status transition for one event.
pub fn transition(
    status: ConversationStatus,
    confirmation_mode: bool,
    event: &Event,
) -> ConversationStatus {
    if status.is_terminal() {
        return status;
    }
    match &event.payload {
        EventPayload::Action(a) if a.tool_name == FINISH_TOOL => ConversationStatus::Finished,
        EventPayload::Action(_) if confirmation_mode => ConversationStatus::WaitingForConfirmation,
        EventPayload::Action(_) => ConversationStatus::Running,
        EventPayload::Observation(_) | EventPayload::UserReject(_) => ConversationStatus::Running,
        EventPayload::Message(m) if m.role == Role::Assistant => ConversationStatus::Idle,
        EventPayload::AgentError(e) if e.error_kind == STUCK_DETECTED || e.error_kind == LLM_FAILURE => {
            ConversationStatus::Errored
        }
        EventPayload::Pause => ConversationStatus::Paused,
        _ => status,
    }
}

/// Reconstruct conversation state by folding the full event sequence.
pub fn replay(id: ConversationId, confirmation_mode: bool, events: &[Event]) -> ConversationState {
    let mut state = ConversationState::new(id, confirmation_mode);
    for event in events {
        state.apply(event);
    }
    state
}
