//! Scripted client: a queue of canned responses for tests and demos.

use crate::client::{LlmClient, LlmError, LlmResult};
use crate::types::{
    AssistantMessage, Content, LlmRequest, LlmResponse, MetricsSnapshot, ToolCall,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays a fixed sequence of responses and records every request it saw.
/// Returns `LlmError::InvalidResponse` when the script runs dry.
pub struct ScriptedClient {
    model: String,
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            model: "scripted".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain-text assistant message.
    pub fn enqueue_text(&self, text: impl Into<String>) {
        self.enqueue(LlmResponse {
            message: AssistantMessage {
                content: vec![Content::text(text)],
                tool_calls: Vec::new(),
            },
            metrics: MetricsSnapshot::default(),
        });
    }

    /// Queue an assistant message with a single tool call.
    pub fn enqueue_tool_call(&self, call_id: &str, tool: &str, arguments: serde_json::Value) {
        self.enqueue(LlmResponse {
            message: AssistantMessage {
                content: Vec::new(),
                tool_calls: vec![ToolCall::new(call_id, tool, &arguments)],
            },
            metrics: MetricsSnapshot::default(),
        });
    }

    /// Queue a fully custom response.
    pub fn enqueue(&self, response: LlmResponse) {
        self.responses
            .lock()
            .expect("scripted client poisoned")
            .push_back(response);
    }

    /// Requests seen so far, in call order.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .expect("scripted client poisoned")
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("scripted client poisoned").len()
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: LlmRequest) -> LlmResult<LlmResponse> {
        self.requests
            .lock()
            .expect("scripted client poisoned")
            .push(request);
        self.responses
            .lock()
            .expect("scripted client poisoned")
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("scripted client exhausted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_and_records_requests() {
        let client = ScriptedClient::new();
        client.enqueue_text("first");
        client.enqueue_tool_call("call_1", "bash", serde_json::json!({"command": "ls"}));

        let r1 = client.complete(LlmRequest::new(Vec::new())).await.unwrap();
        assert_eq!(r1.message.text(), "first");

        let r2 = client.complete(LlmRequest::new(Vec::new())).await.unwrap();
        assert_eq!(r2.message.tool_calls[0].name, "bash");

        assert!(client.complete(LlmRequest::new(Vec::new())).await.is_err());
        assert_eq!(client.recorded_requests().len(), 3);
    }
}
