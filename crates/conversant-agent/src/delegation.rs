//! Delegation: parent conversations spawning child conversations, each on
//! its own task, with child-to-parent message routing and cascade close.
//!
//! The coordinator is conversation-scoped and passed in explicitly; there is
//! no process-wide registry. Only typed child-conversation handles live in
//! it, so ad-hoc entries cannot exist by construction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use conversant_core::state::{LLM_FAILURE, STUCK_DETECTED};
use conversant_core::{ConversationId, ConversationStatus, Event, EventPayload, FINISH_TOOL};
use conversant_llm::LlmClient;
use conversant_tools::{Tool, ToolAnnotations, ToolOutput};
use conversant_workspace::Workspace;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::observer::EventObserver;
use crate::options::ConversationOptions;
use crate::preset;

pub const DELEGATE_TOOL: &str = "delegate";

/// A message routed from a child conversation to its parent.
#[derive(Clone, Debug)]
pub struct ChildNote {
    pub child: ConversationId,
    pub text: String,
}

/// What the coordinator needs from the dispatching parent.
pub(crate) struct DelegateContext {
    pub(crate) parent: ConversationId,
    pub(crate) parent_tx: mpsc::UnboundedSender<ChildNote>,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) workspace: Arc<dyn Workspace>,
}

struct ChildHandle {
    message_tx: mpsc::UnboundedSender<String>,
    close_token: CancellationToken,
    status: Arc<StdMutex<ConversationStatus>>,
    join: StdMutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Edges {
    parent_to_children: HashMap<ConversationId, HashSet<ConversationId>>,
    child_to_parent: HashMap<ConversationId, ConversationId>,
}

/// Parent/child registry. The mutex guards the two maps only; it is never
/// held across I/O.
pub struct DelegationCoordinator {
    edges: StdMutex<Edges>,
    children: DashMap<ConversationId, ChildHandle>,
}

impl DelegationCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            edges: StdMutex::new(Edges::default()),
            children: DashMap::new(),
        })
    }

    pub fn live_children(&self, parent: ConversationId) -> usize {
        self.edges
            .lock()
            .expect("delegation edges poisoned")
            .parent_to_children
            .get(&parent)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn parent_of(&self, child: ConversationId) -> Option<ConversationId> {
        self.edges
            .lock()
            .expect("delegation edges poisoned")
            .child_to_parent
            .get(&child)
            .copied()
    }

    fn register_edge(&self, parent: ConversationId, child: ConversationId) {
        let mut edges = self.edges.lock().expect("delegation edges poisoned");
        edges.parent_to_children.entry(parent).or_default().insert(child);
        edges.child_to_parent.insert(child, parent);
    }

    fn unregister(&self, child: ConversationId) {
        self.children.remove(&child);
        let mut edges = self.edges.lock().expect("delegation edges poisoned");
        if let Some(parent) = edges.child_to_parent.remove(&child) {
            if let Some(set) = edges.parent_to_children.get_mut(&parent) {
                set.remove(&child);
                if set.is_empty() {
                    edges.parent_to_children.remove(&parent);
                }
            }
        }
    }

    /// The engine hands `delegate` actions here instead of the registry.
    pub(crate) fn handle_delegate<'a>(
        self: Arc<Self>,
        ctx: DelegateContext,
        args: &'a Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ToolOutput> + Send + 'a>> {
        Box::pin(async move {
        let operation = args["operation"].as_str().unwrap_or_default();
        match operation {
            "spawn" => {
                let Some(task) = args["task"].as_str() else {
                    return ToolOutput::error("'task' is required for spawn");
                };
                self.spawn_child(ctx, task).await
            }
            "send" => {
                let (Some(child_id), Some(message)) =
                    (args["child_id"].as_str(), args["message"].as_str())
                else {
                    return ToolOutput::error("'child_id' and 'message' are required for send");
                };
                self.send_to_child(ctx.parent, child_id, message)
            }
            "status" => {
                let Some(child_id) = args["child_id"].as_str() else {
                    return ToolOutput::error("'child_id' is required for status");
                };
                self.child_status(ctx.parent, child_id)
            }
            "close" => {
                let Some(child_id) = args["child_id"].as_str() else {
                    return ToolOutput::error("'child_id' is required for close");
                };
                self.close_child(ctx.parent, child_id)
            }
            other => ToolOutput::error(format!("unknown delegate operation: {other}")),
        }
        })
    }

    async fn spawn_child(self: Arc<Self>, ctx: DelegateContext, task: &str) -> ToolOutput {
        let agent = preset::worker_agent(ctx.llm.clone(), ctx.workspace.working_dir());
        let options = ConversationOptions::default().with_max_step_count(30);
        let mut child = match Conversation::new(agent, ctx.workspace.clone(), options) {
            Ok(child) => child,
            Err(e) => return ToolOutput::error(format!("failed to create child: {e}")),
        };
        let child_id = child.id();
        child.add_observer(Arc::new(ParentRouter {
            child: child_id,
            parent_tx: ctx.parent_tx.clone(),
        }));
        if let Err(e) = child.send_message(task) {
            return ToolOutput::error(format!("failed to seed child task: {e}"));
        }

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let close_token = CancellationToken::new();
        let status = child.status_cell();

        // Registration happens before the child task starts so the child can
        // never observe itself missing from the registry.
        self.register_edge(ctx.parent, child_id);
        self.children.insert(
            child_id,
            ChildHandle {
                message_tx,
                close_token: close_token.clone(),
                status,
                join: StdMutex::new(None),
            },
        );

        let coordinator = self.clone();
        let child_future: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            Box::pin(run_child(child, message_rx, close_token, coordinator, child_id));
        let join = tokio::spawn(child_future);
        if let Some(handle) = self.children.get(&child_id) {
            *handle.join.lock().expect("join cell poisoned") = Some(join);
        }

        info!(parent = %ctx.parent, child = %child_id, "spawned child conversation");
        ToolOutput::text(format!(
            "Spawned child conversation {child_id}; it will report back when finished"
        ))
        .with_data(json!({ "child_id": child_id.to_string() }))
    }

    /// Resolve a child id string, enforcing that it belongs to this parent.
    fn resolve_child(&self, parent: ConversationId, child_id: &str) -> Result<ConversationId, ToolOutput> {
        let Ok(id) = ConversationId::parse(child_id) else {
            return Err(ToolOutput::error(format!("invalid child id: {child_id}")));
        };
        if self.parent_of(id) != Some(parent) {
            return Err(ToolOutput::error(format!(
                "no child conversation {child_id} under this conversation"
            )));
        }
        Ok(id)
    }

    fn send_to_child(&self, parent: ConversationId, child_id: &str, message: &str) -> ToolOutput {
        let id = match self.resolve_child(parent, child_id) {
            Ok(id) => id,
            Err(output) => return output,
        };
        match self.children.get(&id) {
            Some(handle) if handle.message_tx.send(message.to_string()).is_ok() => {
                ToolOutput::text(format!("Message delivered to {id}"))
            }
            _ => ToolOutput::error(format!("child conversation {id} is no longer running")),
        }
    }

    fn child_status(&self, parent: ConversationId, child_id: &str) -> ToolOutput {
        let id = match self.resolve_child(parent, child_id) {
            Ok(id) => id,
            Err(output) => return output,
        };
        match self.children.get(&id) {
            Some(handle) => {
                let status = *handle.status.lock().expect("status cell poisoned");
                let label = serde_json::to_value(status)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_else(|| format!("{status:?}"));
                ToolOutput::text(format!("Child {id} is {label}"))
                    .with_data(json!({ "child_id": id.to_string(), "status": label }))
            }
            None => ToolOutput::error(format!("child conversation {id} is no longer running")),
        }
    }

    fn close_child(&self, parent: ConversationId, child_id: &str) -> ToolOutput {
        let id = match self.resolve_child(parent, child_id) {
            Ok(id) => id,
            Err(output) => return output,
        };
        if let Some(handle) = self.children.get(&id) {
            handle.close_token.cancel();
        }
        ToolOutput::text(format!("Requested close of child conversation {id}"))
    }

    /// Cascade close: cancel every child of `parent` and wait out the grace
    /// period. Closing a child never touches its siblings.
    pub async fn close_children_of(&self, parent: ConversationId, grace: Duration) {
        let child_ids: Vec<ConversationId> = self
            .edges
            .lock()
            .expect("delegation edges poisoned")
            .parent_to_children
            .get(&parent)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut joins = Vec::new();
        for id in &child_ids {
            if let Some(handle) = self.children.get(id) {
                handle.close_token.cancel();
                if let Some(join) = handle.join.lock().expect("join cell poisoned").take() {
                    joins.push(join);
                }
            }
        }
        for join in joins {
            if tokio::time::timeout(grace, join).await.is_err() {
                warn!(parent = %parent, "child did not wind down within the grace period");
            }
        }
        for id in child_ids {
            self.unregister(id);
        }
    }
}

/// Watches a child's log and forwards its completion (or terminal failure)
/// to the parent, in child-append order.
struct ParentRouter {
    child: ConversationId,
    parent_tx: mpsc::UnboundedSender<ChildNote>,
}

impl EventObserver for ParentRouter {
    fn on_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::Action(a) if a.tool_name == FINISH_TOOL => {
                let text = a.arguments["message"].as_str().unwrap_or("(task finished)");
                let _ = self.parent_tx.send(ChildNote {
                    child: self.child,
                    text: text.to_string(),
                });
            }
            EventPayload::AgentError(e)
                if e.error_kind == STUCK_DETECTED || e.error_kind == LLM_FAILURE =>
            {
                let _ = self.parent_tx.send(ChildNote {
                    child: self.child,
                    text: format!("Delegated task failed: {}", e.message),
                });
            }
            _ => {}
        }
    }
}

/// The child's driver task: run, then wait for more input or a close signal.
async fn run_child(
    mut child: Conversation,
    mut messages: mpsc::UnboundedReceiver<String>,
    close_token: CancellationToken,
    coordinator: Arc<DelegationCoordinator>,
    child_id: ConversationId,
) {
    let handle = child.handle();
    loop {
        let status = {
            let run = child.run();
            tokio::pin!(run);
            tokio::select! {
                result = &mut run => result.ok(),
                _ = close_token.cancelled() => {
                    // Cooperative stop at the next suspension point, with a
                    // bounded wait before the task is abandoned outright.
                    handle.pause();
                    match tokio::time::timeout(Duration::from_secs(5), &mut run).await {
                        Ok(result) => result.ok(),
                        Err(_) => None,
                    }
                }
            }
        };

        if close_token.is_cancelled() {
            break;
        }
        match status {
            Some(status) if status.is_terminal() => break,
            Some(_) => {
                let next = tokio::select! {
                    _ = close_token.cancelled() => None,
                    message = messages.recv() => message,
                };
                match next {
                    Some(text) => {
                        if child.send_message(text).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            None => break,
        }
    }
    let _ = child.close().await;
    coordinator.unregister(child_id);
    debug!(child = %child_id, "child conversation wound down");
}

/// Schema-only tool: the engine intercepts `delegate` actions and routes
/// them to the coordinator, so this executor is never invoked on the happy
/// path.
pub struct DelegateTool;

#[async_trait::async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL
    }

    fn description(&self) -> &str {
        "Delegate a subtask to a child conversation. Operations: spawn starts \
         a worker on a task and returns its conversation id; send passes a \
         follow-up message to a child; status reports a child's state; close \
         stops a child."
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations {
            open_world: true,
            ..ToolAnnotations::default()
        }
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["spawn", "send", "status", "close"],
                    "description": "Delegation operation"
                },
                "task": {
                    "type": "string",
                    "description": "Task description for spawn"
                },
                "child_id": {
                    "type": "string",
                    "description": "Child conversation id for send/status/close"
                },
                "message": {
                    "type": "string",
                    "description": "Message text for send"
                }
            },
            "required": ["operation"]
        })
    }

    async fn call(&self, _args: Value) -> ToolOutput {
        ToolOutput::error("delegate actions are handled by the conversation engine")
    }
}
