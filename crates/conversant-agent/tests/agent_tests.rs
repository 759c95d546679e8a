//! End-to-end tests for the conversation engine: scripted LLM, real tools
//! against a scratch workspace, delegation across tasks.

use conversant_agent::*;
use conversant_core::{ConversationStatus, CoreError, Event, EventPayload};
use conversant_llm::{
    AssistantMessage, Content, LlmClient, LlmRequest, LlmResponse, LlmResult, MetricsSnapshot,
    ScriptedClient, ToolCall,
};
use conversant_tools::default_registry;
use conversant_workspace::LocalWorkspace;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn kinds(conversation: &Conversation) -> Vec<&'static str> {
    conversation
        .log()
        .iter()
        .map(|e| match &e.payload {
            EventPayload::SystemPrompt(_) => "system_prompt",
            EventPayload::Message(_) => "message",
            EventPayload::Action(_) => "action",
            EventPayload::Observation(_) => "observation",
            EventPayload::AgentError(_) => "agent_error",
            EventPayload::UserReject(_) => "user_reject",
            EventPayload::Pause => "pause",
            EventPayload::CondensationRequest => "condensation_request",
            EventPayload::Condensation(_) => "condensation",
        })
        .collect()
}

fn scripted_conversation(
    script: &Arc<ScriptedClient>,
    options: ConversationOptions,
) -> (tempfile::TempDir, Conversation) {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Arc::new(LocalWorkspace::new(dir.path()).unwrap());
    let agent = Agent::new(
        script.clone(),
        Arc::new(default_registry(dir.path())),
        "You are a coding agent.",
    );
    let conversation = Conversation::new(agent, workspace, options).unwrap();
    (dir, conversation)
}

// ===========================================================================
// Scenario: single tool call
// ===========================================================================

#[tokio::test]
async fn single_bash_tool_call_leaves_a_four_event_log() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue_tool_call("call_1", "bash", json!({"command": "echo hi"}));

    let (_dir, mut conversation) =
        scripted_conversation(&script, ConversationOptions::default().with_max_step_count(1));
    conversation.send_message("say hi").unwrap();
    let status = conversation.run().await.unwrap();

    assert_eq!(
        kinds(&conversation),
        vec!["system_prompt", "message", "action", "observation"]
    );
    let observation = conversation.log().get(3).unwrap().as_observation().unwrap();
    assert_eq!(observation.output.trim(), "hi");
    assert!(!observation.is_error);
    assert_eq!(status, ConversationStatus::Running);
}

#[tokio::test]
async fn sibling_actions_share_response_id_and_metrics_ride_last() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue(LlmResponse {
        message: AssistantMessage {
            content: vec![Content::text("running both")],
            tool_calls: vec![
                ToolCall::new("call_1", "bash", &json!({"command": "echo one"})),
                ToolCall::new("call_2", "bash", &json!({"command": "echo two"})),
            ],
        },
        metrics: MetricsSnapshot {
            prompt_tokens: 42,
            ..MetricsSnapshot::default()
        },
    });

    let (_dir, mut conversation) =
        scripted_conversation(&script, ConversationOptions::default().with_max_step_count(1));
    conversation.send_message("run both").unwrap();
    conversation.run().await.unwrap();

    let actions: Vec<_> = conversation
        .log()
        .iter()
        .filter_map(Event::as_action)
        .collect();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].llm_response_id, actions[1].llm_response_id);
    assert_eq!(actions[0].thought.as_deref(), Some("running both"));
    assert!(actions[0].metrics.is_none());
    assert_eq!(actions[1].metrics.as_ref().unwrap().prompt_tokens, 42);

    // Both actions got their observation, in order.
    let observations: Vec<_> = conversation
        .log()
        .iter()
        .filter_map(Event::as_observation)
        .collect();
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].action_id.as_str(), "call_1");
    assert_eq!(observations[1].action_id.as_str(), "call_2");
}

// ===========================================================================
// Scenario: finish
// ===========================================================================

#[tokio::test]
async fn finish_terminates_and_stays_terminated() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue_tool_call("call_1", "finish", json!({"message": "done"}));

    let (_dir, mut conversation) =
        scripted_conversation(&script, ConversationOptions::default());
    conversation.send_message("wrap up").unwrap();

    assert_eq!(conversation.run().await.unwrap(), ConversationStatus::Finished);
    assert!(conversation.log().last().unwrap().is_finish_action());
    let calls_after_first_run = script.recorded_requests().len();

    // Running again takes no further steps.
    assert_eq!(conversation.run().await.unwrap(), ConversationStatus::Finished);
    assert_eq!(script.recorded_requests().len(), calls_after_first_run);
}

// ===========================================================================
// Scenario: confirmation mode
// ===========================================================================

#[tokio::test]
async fn rejected_action_becomes_a_user_reject_observation() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue_tool_call("call_1", "bash", json!({"command": "rm -rf /"}));
    script.enqueue_tool_call("call_2", "finish", json!({"message": "stopping"}));

    let (_dir, mut conversation) = scripted_conversation(
        &script,
        ConversationOptions::default().with_confirmation_mode(true),
    );
    let handle = conversation.handle();
    conversation.send_message("clean the disk").unwrap();

    let (status, _) = tokio::join!(conversation.run(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.reject("dangerous");
    });
    assert_eq!(status.unwrap(), ConversationStatus::Finished);

    let reject = conversation
        .log()
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::UserReject(r) => Some(r.clone()),
            _ => None,
        })
        .expect("rejection recorded");
    assert_eq!(reject.rejection_reason, "dangerous");
    assert_eq!(reject.action_id.as_str(), "call_1");

    // The bash executor never ran: no observation references the action.
    assert!(!conversation
        .log()
        .iter()
        .filter_map(Event::as_observation)
        .any(|o| o.action_id.as_str() == "call_1"));
}

#[tokio::test]
async fn accepted_actions_dispatch_normally() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue_tool_call("call_1", "bash", json!({"command": "echo approved"}));
    script.enqueue_tool_call("call_2", "finish", json!({"message": "done"}));

    let (_dir, mut conversation) = scripted_conversation(
        &script,
        ConversationOptions::default().with_confirmation_mode(true),
    );
    let handle = conversation.handle();
    conversation.send_message("go").unwrap();

    let (status, _) = tokio::join!(conversation.run(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.accept();
    });
    assert_eq!(status.unwrap(), ConversationStatus::Finished);

    let observation = conversation
        .log()
        .iter()
        .filter_map(Event::as_observation)
        .find(|o| o.action_id.as_str() == "call_1")
        .expect("approved action executed");
    assert_eq!(observation.output.trim(), "approved");
}

// ===========================================================================
// Scenario: finish mixed with sibling tool calls in one turn
// ===========================================================================

#[tokio::test]
async fn siblings_resolve_before_finish_even_when_finish_comes_first() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue(LlmResponse {
        message: AssistantMessage {
            content: Vec::new(),
            tool_calls: vec![
                ToolCall::new("call_fin", "finish", &json!({"message": "done"})),
                ToolCall::new("call_1", "bash", &json!({"command": "echo last words"})),
            ],
        },
        metrics: MetricsSnapshot {
            prompt_tokens: 7,
            ..MetricsSnapshot::default()
        },
    });

    let (_dir, mut conversation) =
        scripted_conversation(&script, ConversationOptions::default());
    conversation.send_message("finish up").unwrap();
    assert_eq!(conversation.run().await.unwrap(), ConversationStatus::Finished);

    // The sibling ran and got its observation before the finish landed.
    let observation = conversation
        .log()
        .iter()
        .filter_map(Event::as_observation)
        .find(|o| o.action_id.as_str() == "call_1")
        .expect("sibling action resolved");
    assert_eq!(observation.output.trim(), "last words");
    assert!(conversation.log().last().unwrap().is_finish_action());

    // No action in the log is left dangling.
    for (offset, event) in conversation.log().iter().enumerate() {
        let Some(action) = event.as_action() else { continue };
        if action.tool_name == "finish" {
            continue;
        }
        let resolved = conversation
            .log()
            .iter()
            .skip(offset)
            .filter_map(Event::as_observation)
            .any(|o| o.action_id == action.tool_call_id);
        assert!(resolved, "action at {offset} has no observation");
    }

    // Metrics ride the last appended action of the turn (the finish).
    let finish = conversation.log().last().unwrap().as_action().unwrap();
    assert_eq!(finish.metrics.as_ref().unwrap().prompt_tokens, 7);
}

#[tokio::test]
async fn rejected_siblings_resolve_before_a_deferred_finish() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue(LlmResponse {
        message: AssistantMessage {
            content: Vec::new(),
            tool_calls: vec![
                ToolCall::new("call_1", "bash", &json!({"command": "rm -rf /"})),
                ToolCall::new("call_fin", "finish", &json!({"message": "cleaned"})),
            ],
        },
        metrics: MetricsSnapshot::default(),
    });

    let (_dir, mut conversation) = scripted_conversation(
        &script,
        ConversationOptions::default().with_confirmation_mode(true),
    );
    let handle = conversation.handle();
    conversation.send_message("clean up and finish").unwrap();

    let (status, _) = tokio::join!(conversation.run(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.reject("not on my disk");
    });
    assert_eq!(status.unwrap(), ConversationStatus::Finished);

    // The rejection resolved the sibling, and only then did finish land.
    let reject_offset = conversation
        .log()
        .iter()
        .position(|e| matches!(e.payload, EventPayload::UserReject(_)))
        .expect("rejection recorded");
    let finish_offset = conversation
        .log()
        .iter()
        .position(|e| e.is_finish_action())
        .expect("finish recorded");
    assert!(reject_offset < finish_offset);
    assert!(!conversation
        .log()
        .iter()
        .filter_map(Event::as_observation)
        .any(|o| o.action_id.as_str() == "call_1"));
}

// ===========================================================================
// Scenario: stuck detection
// ===========================================================================

#[tokio::test]
async fn repeating_the_same_action_errors_the_conversation() {
    let script = Arc::new(ScriptedClient::new());
    for i in 1..=3 {
        script.enqueue_tool_call(&format!("call_{i}"), "bash", json!({"command": "echo loop"}));
    }

    let (_dir, mut conversation) = scripted_conversation(
        &script,
        ConversationOptions::default().with_stuck_repeat_threshold(3),
    );
    conversation.send_message("loop forever").unwrap();

    assert_eq!(conversation.run().await.unwrap(), ConversationStatus::Errored);
    let last = conversation.log().last().unwrap();
    match &last.payload {
        EventPayload::AgentError(e) => assert_eq!(e.error_kind, "stuck_detected"),
        other => panic!("expected stuck agent error, got {other:?}"),
    }
}

// ===========================================================================
// Pause
// ===========================================================================

struct EndlessClient {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl LlmClient for EndlessClient {
    fn model(&self) -> &str {
        "endless"
    }

    async fn complete(&self, _request: LlmRequest) -> LlmResult<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LlmResponse {
            message: AssistantMessage {
                content: Vec::new(),
                tool_calls: vec![ToolCall::new(
                    format!("call_{n}"),
                    "bash",
                    &json!({"command": format!("sleep 0.05; echo tick {n}")}),
                )],
            },
            metrics: MetricsSnapshot::default(),
        })
    }
}

#[tokio::test]
async fn pause_is_observed_at_the_next_suspension_point() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Arc::new(LocalWorkspace::new(dir.path()).unwrap());
    let agent = Agent::new(
        Arc::new(EndlessClient {
            calls: AtomicUsize::new(0),
        }),
        Arc::new(default_registry(dir.path())),
        "You are a coding agent.",
    );
    let mut conversation = Conversation::new(
        agent,
        workspace,
        ConversationOptions::default().with_max_step_count(10_000),
    )
    .unwrap();
    let handle = conversation.handle();
    conversation.send_message("tick forever").unwrap();

    let (status, _) = tokio::join!(conversation.run(), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.pause();
    });
    assert_eq!(status.unwrap(), ConversationStatus::Paused);
    assert!(matches!(
        conversation.log().last().unwrap().payload,
        EventPayload::Pause
    ));

    // Resumable: the run loop picks back up after the pause marker.
    let handle = conversation.handle();
    let (status, _) = tokio::join!(conversation.run(), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.pause();
    });
    assert_eq!(status.unwrap(), ConversationStatus::Paused);
}

// ===========================================================================
// Close
// ===========================================================================

#[tokio::test]
async fn close_rejects_further_work() {
    let script = Arc::new(ScriptedClient::new());
    script.enqueue_tool_call("call_1", "finish", json!({"message": "done"}));

    let (_dir, mut conversation) =
        scripted_conversation(&script, ConversationOptions::default());
    conversation.send_message("finish").unwrap();
    conversation.run().await.unwrap();

    conversation.close().await.unwrap();
    assert!(conversation.is_closed());
    assert!(matches!(
        conversation.send_message("more"),
        Err(CoreError::ConversationClosed)
    ));
    assert!(matches!(
        conversation.run().await,
        Err(CoreError::ConversationClosed)
    ));
    // Idempotent.
    conversation.close().await.unwrap();
}

// ===========================================================================
// Persistence across restarts
// ===========================================================================

#[tokio::test]
async fn persisted_conversation_resumes_with_identical_state() {
    let workspace_dir = tempfile::tempdir().unwrap();
    let log_dir = tempfile::tempdir().unwrap();
    let workspace = Arc::new(LocalWorkspace::new(workspace_dir.path()).unwrap());

    let script = Arc::new(ScriptedClient::new());
    script.enqueue_tool_call("call_1", "bash", json!({"command": "echo persisted"}));
    script.enqueue_tool_call("call_2", "finish", json!({"message": "done"}));

    let (id, log_len) = {
        let agent = Agent::new(
            script.clone(),
            Arc::new(default_registry(workspace_dir.path())),
            "You are a coding agent.",
        );
        let mut conversation = Conversation::new(
            agent,
            workspace.clone(),
            ConversationOptions::default().with_persistence_dir(log_dir.path()),
        )
        .unwrap();
        conversation.send_message("do it").unwrap();
        assert_eq!(conversation.run().await.unwrap(), ConversationStatus::Finished);
        (conversation.id(), conversation.log().len())
    };

    let agent = Agent::new(
        script,
        Arc::new(default_registry(workspace_dir.path())),
        "You are a coding agent.",
    );
    let reopened = Conversation::new(
        agent,
        workspace,
        ConversationOptions::default().with_persistence_dir(log_dir.path()),
    )
    .unwrap();

    assert_eq!(reopened.id(), id);
    assert_eq!(reopened.log().len(), log_len);
    assert_eq!(reopened.status(), ConversationStatus::Finished);
}

// ===========================================================================
// Observers
// ===========================================================================

#[tokio::test]
async fn observers_see_every_append_in_order() {
    let observer = CollectingObserver::new();
    let script = Arc::new(ScriptedClient::new());
    script.enqueue_tool_call("call_1", "finish", json!({"message": "done"}));

    let (_dir, mut conversation) = scripted_conversation(
        &script,
        ConversationOptions::default().with_callback(observer.clone()),
    );
    conversation.send_message("finish").unwrap();
    conversation.run().await.unwrap();

    let seen = observer.events();
    assert_eq!(seen.len(), conversation.log().len());
    for (seen, logged) in seen.iter().zip(conversation.log().iter()) {
        assert_eq!(seen.id, logged.id);
    }
}

// ===========================================================================
// Delegation round trip
// ===========================================================================

/// Routes by conversation role: workers finish with a report; the lead
/// spawns a child, waits, then finishes once the report arrives.
struct DelegationScript;

fn tool_response(id: &str, name: &str, args: serde_json::Value) -> LlmResponse {
    LlmResponse {
        message: AssistantMessage {
            content: Vec::new(),
            tool_calls: vec![ToolCall::new(id, name, &args)],
        },
        metrics: MetricsSnapshot::default(),
    }
}

fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        message: AssistantMessage {
            content: vec![Content::text(text)],
            tool_calls: Vec::new(),
        },
        metrics: MetricsSnapshot::default(),
    }
}

#[async_trait::async_trait]
impl LlmClient for DelegationScript {
    fn model(&self) -> &str {
        "delegation-script"
    }

    async fn complete(&self, request: LlmRequest) -> LlmResult<LlmResponse> {
        let joined = request
            .messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n");

        let response = if joined.contains("focused worker") {
            tool_response("call_w", "finish", json!({"message": "report: analysis complete"}))
        } else if joined.contains("report: analysis complete") {
            tool_response("call_p2", "finish", json!({"message": "done"}))
        } else if joined.contains("Spawned child") {
            text_response("waiting for the worker")
        } else {
            tool_response(
                "call_p1",
                "delegate",
                json!({"operation": "spawn", "task": "analyze the repository"}),
            )
        };
        Ok(response)
    }
}

#[tokio::test]
async fn delegation_routes_the_child_report_into_the_parent_log() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Arc::new(LocalWorkspace::new(dir.path()).unwrap());
    let llm: Arc<dyn LlmClient> = Arc::new(DelegationScript);

    let agent = lead_agent(llm, dir.path());
    let coordinator = DelegationCoordinator::new();
    let mut parent = Conversation::new(agent, workspace, ConversationOptions::default())
        .unwrap()
        .with_delegation(coordinator.clone());
    let parent_id = parent.id();

    parent.send_message("delegate this analysis").unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), parent.run())
        .await
        .expect("parent should not hang")
        .unwrap();
    assert_eq!(status, ConversationStatus::Finished);

    // The spawn observation names the child.
    let child_id = parent
        .log()
        .iter()
        .filter_map(Event::as_observation)
        .find(|o| o.tool_name == "delegate")
        .and_then(|o| o.data.as_ref())
        .and_then(|d| d["child_id"].as_str().map(String::from))
        .expect("spawn observation with child id");

    // The child's report landed as a user-role message tagged with its id.
    let routed = parent
        .log()
        .iter()
        .filter_map(Event::as_message)
        .find(|m| m.sender_conversation.is_some())
        .expect("routed child message");
    assert_eq!(routed.sender_conversation.unwrap().to_string(), child_id);
    assert!(routed.content[0]
        .as_text()
        .unwrap()
        .contains("report: analysis complete"));

    // The child wound down and unregistered itself.
    for _ in 0..40 {
        if coordinator.live_children(parent_id) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(coordinator.live_children(parent_id), 0);

    parent.close().await.unwrap();
}

/// Workers that never finish: the lead spawns one and waits; closing the
/// parent must cascade to the child.
struct SlowWorkerScript {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl LlmClient for SlowWorkerScript {
    fn model(&self) -> &str {
        "slow-worker-script"
    }

    async fn complete(&self, request: LlmRequest) -> LlmResult<LlmResponse> {
        let joined = request
            .messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n");
        let n = self.calls.fetch_add(1, Ordering::SeqCst);

        let response = if joined.contains("focused worker") {
            // Argument varies per call so the stuck detector stays quiet.
            tool_response(
                &format!("call_w{n}"),
                "bash",
                json!({"command": format!("sleep 0.2 # {n}")}),
            )
        } else if joined.contains("Spawned child") {
            text_response("waiting for the worker")
        } else {
            tool_response(
                "call_p1",
                "delegate",
                json!({"operation": "spawn", "task": "grind away"}),
            )
        };
        Ok(response)
    }
}

#[tokio::test]
async fn closing_the_parent_cascades_to_children() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Arc::new(LocalWorkspace::new(dir.path()).unwrap());
    let llm: Arc<dyn LlmClient> = Arc::new(SlowWorkerScript {
        calls: AtomicUsize::new(0),
    });

    let agent = lead_agent(llm, dir.path());
    let coordinator = DelegationCoordinator::new();
    let mut parent = Conversation::new(agent, workspace, ConversationOptions::default())
        .unwrap()
        .with_delegation(coordinator.clone());
    let parent_id = parent.id();
    let handle = parent.handle();

    parent.send_message("keep a worker busy").unwrap();
    let (status, _) = tokio::join!(parent.run(), async {
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.pause();
    });
    assert_eq!(status.unwrap(), ConversationStatus::Paused);
    assert_eq!(coordinator.live_children(parent_id), 1);

    parent.close().await.unwrap();
    assert_eq!(coordinator.live_children(parent_id), 0);
}
