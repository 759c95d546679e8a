//! Finish tool: signals end-of-task. The engine intercepts the action and
//! transitions the conversation; this executor only exists so the tool has a
//! schema the LLM can see.

use crate::registry::{Tool, ToolAnnotations, ToolOutput};
use serde_json::{json, Value};

pub struct FinishTool;

#[async_trait::async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        "finish"
    }

    fn description(&self) -> &str {
        "Signal that the task is complete. Include a final message \
         summarizing what was done."
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations {
            idempotent: true,
            ..ToolAnnotations::default()
        }
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Final message describing the outcome"
                }
            },
            "required": ["message"]
        })
    }

    async fn call(&self, _args: Value) -> ToolOutput {
        ToolOutput::text("Task marked as finished.")
    }
}
