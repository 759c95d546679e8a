//! Conversant core: the event model, the append-only log, and the view.
//!
//! A conversation is fully determined by its event log. Everything else in
//! this crate is derived: `ConversationState` is a fold over the log, and
//! `View` is the projection the LLM message list is built from.

pub mod error;
pub mod event;
pub mod log;
pub mod state;
pub mod store;
pub mod view;

pub use error::{CoreError, Result};
pub use event::{
    ActionEvent, AgentErrorEvent, Condensation, Event, EventId, EventPayload, EventSource,
    LlmResponseId, MessageEvent, ObservationEvent, SystemPromptEvent, ToolCallId,
    UserRejectObservation, FINISH_TOOL, THINK_TOOL,
};
pub use log::EventLog;
pub use state::{replay, AgentSpec, ConversationId, ConversationState, ConversationStatus};
pub use store::{FileStore, StateSnapshot};
pub use view::View;
