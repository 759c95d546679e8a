//! The agent: an LLM client plus a tool set plus a system prompt. One step
//! of progress is one completion and the execution of whatever it asked for;
//! the engine in `conversation.rs` drives steps in a loop.

use crate::condenser::{Condenser, NoOpCondenser};
use conversant_core::{AgentSpec, View};
use conversant_llm::{LlmClient, LlmMessage, LlmRequest};
use conversant_tools::ToolRegistry;
use std::sync::Arc;

pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    condenser: Arc<dyn Condenser>,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            tools,
            system_prompt: system_prompt.into(),
            condenser: Arc::new(NoOpCondenser),
        }
    }

    pub fn with_condenser(mut self, condenser: Arc<dyn Condenser>) -> Self {
        self.condenser = condenser;
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn condenser(&self) -> &Arc<dyn Condenser> {
        &self.condenser
    }

    /// Compact descriptor persisted in `state.json`.
    pub fn spec(&self) -> AgentSpec {
        AgentSpec {
            model: self.llm.model().to_string(),
            system_prompt: self.system_prompt.clone(),
            tool_names: self.tools.names(),
        }
    }

    /// Build one completion request from the view: a fresh system prompt
    /// first (tools may have changed since the last step, so the schemas are
    /// re-serialized every time), then the view's message list.
    pub fn build_request(&self, view: &View) -> LlmRequest {
        let mut messages = Vec::with_capacity(view.len() + 1);
        messages.push(LlmMessage::system(self.system_prompt.clone()));
        messages.extend(view.to_messages());
        LlmRequest::new(messages).with_tools(self.tools.schemas())
    }
}
