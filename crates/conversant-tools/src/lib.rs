//! Conversant tool runtime: the typed action/observation protocol and the
//! built-in executors (bash session, file editor, search tools).
//!
//! Each tool is a self-contained file in src/tools/. To add a tool:
//! implement the Tool trait and register it in `default_registry` (or build
//! a registry by hand for a custom preset).

pub mod paths;
pub mod registry;
pub mod schema;
pub mod session;
pub mod tools;
pub mod truncate;

pub use registry::{Tool, ToolAnnotations, ToolOutput, ToolRegistry};
pub use schema::{validate_arguments, SchemaViolation};
pub use session::{BashExecution, BashSession, BashSessionConfig, CommandStatus, SessionError};
pub use tools::bash::BashTool;
pub use tools::editor::{EditorTool, FileEditor};
pub use tools::finish::FinishTool;
pub use tools::glob::GlobTool;
pub use tools::grep::GrepTool;
pub use tools::think::ThinkTool;
pub use truncate::truncate_head_tail;

use std::path::Path;

/// Registry with the full builtin tool set rooted at a workspace directory.
pub fn default_registry(workspace_root: impl AsRef<Path>) -> ToolRegistry {
    let root = workspace_root.as_ref();
    let mut registry = ToolRegistry::new();

    // Read-only tools
    registry.register(GlobTool::new(root));
    registry.register(GrepTool::new(root));
    registry.register(ThinkTool);

    // Mutation tools
    registry.register(EditorTool::new(root));
    registry.register(BashTool::new(root));

    // Engine-recognized
    registry.register(FinishTool);

    registry
}

/// Reduced tool set for delegated worker conversations: execution and
/// editing, no recursive delegation.
pub fn worker_registry(workspace_root: impl AsRef<Path>) -> ToolRegistry {
    let root = workspace_root.as_ref();
    let mut registry = ToolRegistry::new();
    registry.register(GrepTool::new(root));
    registry.register(GlobTool::new(root));
    registry.register(EditorTool::new(root));
    registry.register(BashTool::new(root));
    registry.register(FinishTool);
    registry
}
