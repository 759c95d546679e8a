//! Conversant agent engine: the conversation run loop, the per-step agent
//! contract, condensers, stuck detection, and the delegation coordinator.

pub mod agent;
pub mod condenser;
pub mod conversation;
pub mod delegation;
pub mod observer;
pub mod options;
pub mod preset;
pub mod stuck;

pub use agent::Agent;
pub use condenser::{
    Condenser, CondenserOutcome, CondenserPipeline, LlmSummarizingCondenser, NoOpCondenser,
};
pub use conversation::{ConfirmationDecision, Conversation, ConversationHandle};
pub use delegation::{ChildNote, DelegateTool, DelegationCoordinator, DELEGATE_TOOL};
pub use observer::{CollectingObserver, EventObserver};
pub use options::ConversationOptions;
pub use preset::{lead_agent, worker_agent};
pub use stuck::{StuckDetector, StuckReason};
