//! Think tool: pure logging, no environment effect.

use crate::registry::{Tool, ToolAnnotations, ToolOutput};
use serde_json::{json, Value};
use tracing::debug;

pub struct ThinkTool;

#[async_trait::async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Record a thought without taking any action. Use to reason through \
         a problem before acting."
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::read_only()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "The thought to record"
                }
            },
            "required": ["thought"]
        })
    }

    async fn call(&self, args: Value) -> ToolOutput {
        if let Some(thought) = args["thought"].as_str() {
            debug!(chars = thought.len(), "thought recorded");
        }
        ToolOutput::text("Your thought has been logged.")
    }
}
