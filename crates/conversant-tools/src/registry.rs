//! Tool trait and registry.
//!
//! Each tool is a self-contained module in src/tools/. Registration is
//! explicit and idempotent: re-registering a name replaces the descriptor.

use conversant_llm::ToolSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::schema;

/// Behavior hints declared by a tool, surfaced alongside its schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToolAnnotations {
    pub read_only: bool,
    pub destructive: bool,
    pub idempotent: bool,
    pub open_world: bool,
}

impl ToolAnnotations {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            idempotent: true,
            ..Self::default()
        }
    }

    pub fn destructive() -> Self {
        Self {
            destructive: true,
            ..Self::default()
        }
    }
}

/// What an executor hands back: text for the LLM, optional structured data,
/// and an error flag. Failures are results, not panics.
#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub text: String,
    pub data: Option<Value>,
    pub is_error: bool,
    /// Scaffold-level failure (e.g. a recycled shell): recorded as an
    /// agent-error event instead of a plain observation.
    pub agent_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
            is_error: false,
            agent_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
            is_error: true,
            agent_error: false,
        }
    }

    pub fn agent_error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
            is_error: true,
            agent_error: true,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A named, typed capability exposed to the LLM. Executors are stateful; the
/// bash tool keeps its shell alive across calls.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "bash", "editor", "glob").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// JSON Schema for the structured output, when the tool produces one.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::default()
    }

    /// Execute with already-validated arguments.
    async fn call(&self, args: Value) -> ToolOutput;

    /// Release held resources (shell processes, connections). Called once at
    /// conversation close.
    async fn shutdown(&self) {}

    fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Map from tool name to descriptor. Writes happen at setup; reads are
/// lock-free afterwards.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            warn!(tool = %name, "replacing registered tool");
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Validate arguments against the tool's input schema, then execute. A
    /// missing tool or invalid arguments produce an error output so the LLM
    /// can see and react; the engine never crashes on them.
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutput {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutput::error(format!("Tool not found: {name}"));
        };
        if let Err(violation) = schema::validate_arguments(&tool.input_schema(), &args) {
            return ToolOutput::error(format!(
                "Invalid arguments for {name} at {}: {}",
                violation.path, violation.detail
            ));
        }
        let output = tool.call(args).await;
        if let (Some(schema), Some(data)) = (tool.output_schema(), output.data.as_ref()) {
            if let Err(violation) = schema::validate_arguments(&schema, data) {
                return ToolOutput::error(format!(
                    "Tool {name} produced output violating its schema at {}: {}",
                    violation.path, violation.detail
                ));
            }
        }
        output
    }

    /// Serialize the active tool set into the schema list the LLM sees.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.to_schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tear down every executor.
    pub async fn shutdown_all(&self) {
        for tool in self.tools.values() {
            tool.shutdown().await;
        }
    }
}
