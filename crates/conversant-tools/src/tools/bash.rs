//! Bash tool: run commands in the persistent session, feed input to a
//! running command, or interrupt it.

use crate::registry::{Tool, ToolAnnotations, ToolOutput};
use crate::session::{BashSession, BashSessionConfig, CommandStatus, SessionError};
use crate::truncate::floor_char_boundary;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

pub struct BashTool {
    session: Mutex<BashSession>,
}

impl BashTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self::with_config(BashSessionConfig::new(workspace_root))
    }

    pub fn with_config(config: BashSessionConfig) -> Self {
        Self {
            session: Mutex::new(BashSession::new(config)),
        }
    }

    /// Whether the shell process is currently alive. Test hook.
    pub async fn shell_alive(&self) -> bool {
        self.session.lock().await.is_alive()
    }
}

fn describe(execution: &crate::session::BashExecution) -> ToolOutput {
    let mut text = execution.output.clone();
    match execution.status {
        CommandStatus::Completed => {
            if let Some(code) = execution.exit_code {
                if code != 0 {
                    text.push_str(&format!("\n(exit code: {code})"));
                }
            }
        }
        CommandStatus::TimedOut => {
            text.push_str(
                "\n(command is still running: no exit within the timeout; \
                 use send_input to feed it or interrupt to stop it)",
            );
        }
        CommandStatus::Interrupted => {
            text.push_str("\n(command interrupted)");
        }
    }
    let text = if text.trim().is_empty() {
        "(no output)".to_string()
    } else {
        text
    };
    ToolOutput {
        is_error: matches!(execution.status, CommandStatus::TimedOut),
        ..ToolOutput::text(text)
    }
    .with_data(json!({
        "exit_code": execution.exit_code,
        "status": match execution.status {
            CommandStatus::Completed => "completed",
            CommandStatus::TimedOut => "timed_out",
            CommandStatus::Interrupted => "interrupted",
        },
    }))
}

fn describe_session_error(err: SessionError) -> ToolOutput {
    match err {
        SessionError::Recycled => ToolOutput::agent_error(
            "bash session desynchronized and was recycled; \
             environment variables set earlier are gone",
        ),
        other => ToolOutput::error(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in a persistent shell session. Environment, \
         working directory, and exported variables persist across calls. \
         Modes: run (default) executes a command; send_input writes to a \
         running command's stdin; interrupt stops the running command."
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations {
            destructive: true,
            open_world: true,
            ..ToolAnnotations::default()
        }
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command to run, or text to send in send_input mode"
                },
                "mode": {
                    "type": "string",
                    "enum": ["run", "send_input", "interrupt"],
                    "description": "Operation mode (default: run)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Seconds to wait for completion (default 30)"
                }
            },
            "required": []
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "exit_code": {"type": "integer"},
                "status": {"type": "string", "enum": ["completed", "timed_out", "interrupted"]}
            },
            "required": ["status"]
        }))
    }

    async fn call(&self, args: Value) -> ToolOutput {
        let mode = args["mode"].as_str().unwrap_or("run");
        let timeout = args["timeout"].as_u64().map(Duration::from_secs);
        let mut session = self.session.lock().await;

        match mode {
            "run" => {
                let Some(command) = args["command"].as_str() else {
                    return ToolOutput::error("'command' is required in run mode");
                };
                debug!(command = %&command[..floor_char_boundary(command, 80)], "bash run");
                match session.run(command, timeout).await {
                    Ok(execution) => describe(&execution),
                    Err(e) => describe_session_error(e),
                }
            }
            "send_input" => {
                let Some(input) = args["command"].as_str() else {
                    return ToolOutput::error("'command' carries the input in send_input mode");
                };
                match session.send_input(input, timeout).await {
                    Ok(execution) => describe(&execution),
                    Err(e) => describe_session_error(e),
                }
            }
            "interrupt" => match session.interrupt().await {
                Ok(execution) => describe(&execution),
                Err(e) => describe_session_error(e),
            },
            other => ToolOutput::error(format!("unknown mode: {other}")),
        }
    }

    async fn shutdown(&self) {
        self.session.lock().await.shutdown().await;
    }
}
