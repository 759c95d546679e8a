//! Conversant: an SDK for driving an LLM-powered coding agent through an
//! event-sourced, tool-augmented conversation.
//!
//! The conversation engine runs an agent (LLM plus tool set) to completion
//! under a bounded step budget, with pause/resume, confirmation mode, and
//! stuck detection. Every observable thing that happens is an event in an
//! append-only log; the log fully determines conversation state. Tools run
//! against a workspace, either the local machine or a remote agent server
//! wrapping a sandbox, and parent conversations can delegate subtasks to
//! child conversations running on their own tasks.
//!
//! ```no_run
//! use conversant::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo(llm: Arc<dyn LlmClient>) -> anyhow::Result<()> {
//! let workspace = Arc::new(LocalWorkspace::new("/tmp/workspace")?);
//! let agent = lead_agent(llm, workspace.working_dir());
//! let mut conversation = Conversation::new(agent, workspace, ConversationOptions::default())?
//!     .with_delegation(DelegationCoordinator::new());
//!
//! conversation.send_message("Run the test suite and fix any failures.")?;
//! let status = conversation.run().await?;
//! println!("conversation ended {status:?}");
//! conversation.close().await?;
//! # Ok(())
//! # }
//! ```

pub use conversant_agent as agent;
pub use conversant_core as core;
pub use conversant_llm as llm;
pub use conversant_tools as tools;
pub use conversant_workspace as workspace;

pub mod prelude {
    pub use conversant_agent::{
        lead_agent, worker_agent, Agent, CollectingObserver, Condenser, CondenserPipeline,
        ConfirmationDecision, Conversation, ConversationHandle, ConversationOptions,
        DelegationCoordinator, EventObserver, LlmSummarizingCondenser, NoOpCondenser,
    };
    pub use conversant_core::{
        ConversationId, ConversationStatus, CoreError, Event, EventLog, EventPayload, View,
    };
    pub use conversant_llm::{
        LlmClient, LlmError, LlmRequest, LlmResponse, MetricsSnapshot, RetryPolicy,
        RetryingClient, ScriptedClient,
    };
    pub use conversant_tools::{
        default_registry, BashTool, EditorTool, FileEditor, Tool, ToolOutput, ToolRegistry,
    };
    pub use conversant_workspace::{
        CommandOutcome, LocalWorkspace, RemoteWorkspace, Workspace, WorkspaceError,
    };
}
