//! Tests for conversant-llm: message assembly, scripted client, retry wrapper.

use conversant_llm::*;
use std::sync::Arc;
use std::time::Duration;

// ===========================================================================
// Messages
// ===========================================================================

#[test]
fn message_constructors_set_roles() {
    assert_eq!(LlmMessage::system("s").role, Role::System);
    assert_eq!(LlmMessage::user("u").role, Role::User);
    let tool = LlmMessage::tool_result("call_1", "out");
    assert_eq!(tool.role, Role::Tool);
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
}

#[test]
fn empty_tool_calls_are_omitted_from_json() {
    let value = serde_json::to_value(LlmMessage::user("hi")).unwrap();
    assert!(value.get("tool_calls").is_none());
    assert!(value.get("tool_call_id").is_none());
}

#[test]
fn request_serializes_tools_and_params() {
    let request = LlmRequest::new(vec![LlmMessage::user("hi")]).with_tools(vec![ToolSchema {
        name: "bash".into(),
        description: "run".into(),
        input_schema: serde_json::json!({"type": "object"}),
    }]);
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["tools"][0]["name"], "bash");
}

// ===========================================================================
// Scripted client + retry wrapper
// ===========================================================================

#[tokio::test]
async fn retrying_client_passes_scripted_responses_through() {
    let scripted = Arc::new(ScriptedClient::new());
    scripted.enqueue_text("hello");

    let client = RetryingClient::new(
        scripted.clone(),
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1)),
    );
    let response = client.complete(LlmRequest::new(Vec::new())).await.unwrap();
    assert_eq!(response.message.text(), "hello");
    assert_eq!(scripted.recorded_requests().len(), 1);
}

#[tokio::test]
async fn exhausted_script_is_a_permanent_failure() {
    let scripted = Arc::new(ScriptedClient::new());
    let client = RetryingClient::new(
        scripted.clone(),
        RetryPolicy::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(1)),
    );
    let err = client
        .complete(LlmRequest::new(Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_response");
    // Permanent errors never burn additional attempts.
    assert_eq!(scripted.recorded_requests().len(), 1);
}

#[test]
fn metrics_snapshot_round_trips() {
    let metrics = MetricsSnapshot {
        prompt_tokens: 120,
        completion_tokens: 30,
        cache_read_tokens: 64,
        cache_write_tokens: 0,
        reasoning_tokens: 12,
        accumulated_cost: 0.0042,
    };
    let back: MetricsSnapshot =
        serde_json::from_str(&serde_json::to_string(&metrics).unwrap()).unwrap();
    assert_eq!(back, metrics);
}
