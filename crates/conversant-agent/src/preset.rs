//! Agent presets: system prompts plus tool sets.

use crate::agent::Agent;
use crate::delegation::DelegateTool;
use conversant_llm::LlmClient;
use conversant_tools::{default_registry, worker_registry};
use std::path::Path;
use std::sync::Arc;

const LEAD_SYSTEM_PROMPT: &str = "You are a software engineering agent working in a sandboxed \
workspace. Use the bash tool for commands, the editor tool for file changes, \
and glob/grep to explore. Delegate independent subtasks with the delegate \
tool and call finish when the task is complete.";

const WORKER_SYSTEM_PROMPT: &str = "You are a focused worker agent handling one delegated \
subtask in a sandboxed workspace. Work the task to completion with the bash \
and editor tools, then call finish with a concise report of what you did and \
found.";

/// Full tool set plus delegation. The default for top-level conversations.
pub fn lead_agent(llm: Arc<dyn LlmClient>, workspace_root: impl AsRef<Path>) -> Agent {
    let mut registry = default_registry(workspace_root);
    registry.register(DelegateTool);
    Agent::new(llm, Arc::new(registry), LEAD_SYSTEM_PROMPT)
}

/// Reduced tool set, no recursive delegation. Used for spawned children.
pub fn worker_agent(llm: Arc<dyn LlmClient>, workspace_root: impl AsRef<Path>) -> Agent {
    Agent::new(llm, Arc::new(worker_registry(workspace_root)), WORKER_SYSTEM_PROMPT)
}
