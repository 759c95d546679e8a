//! The conversation engine: an event-sourced state machine driving an agent
//! to completion under a bounded step budget.
//!
//! One conversation runs on one task; steps and tool executors are strictly
//! serial within it. The only suspension points are the LLM call, executor
//! awaits, the confirmation-mode wait, and the delegation child-message wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use conversant_core::{
    replay, ActionEvent, ConversationId, ConversationState, ConversationStatus, CoreError, Event,
    EventLog, EventPayload, LlmResponseId, ObservationEvent, Result, StateSnapshot, ToolCallId,
    View, FINISH_TOOL,
};
use conversant_core::state::{LLM_FAILURE, STUCK_DETECTED};
use conversant_tools::{truncate_head_tail, ToolOutput};
use conversant_workspace::Workspace;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::condenser::CondenserOutcome;
use crate::delegation::{ChildNote, DelegateContext, DelegationCoordinator, DELEGATE_TOOL};
use crate::observer::EventObserver;
use crate::options::ConversationOptions;
use crate::stuck::StuckDetector;

/// Observation text budget before head/tail elision.
const MAX_OBSERVATION_BYTES: usize = 50_000;

/// Caller's answer in confirmation mode.
#[derive(Clone, Debug)]
pub enum ConfirmationDecision {
    Accept,
    Reject(String),
}

/// Cheap clonable handle for signalling a running conversation from another
/// task: pause requests and confirmation decisions.
#[derive(Clone)]
pub struct ConversationHandle {
    pause_requested: Arc<AtomicBool>,
    pause_notify: Arc<Notify>,
    confirm_tx: mpsc::UnboundedSender<ConfirmationDecision>,
}

impl ConversationHandle {
    /// Non-blocking; the engine observes the flag at its next suspension
    /// point.
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
        self.pause_notify.notify_one();
    }

    pub fn accept(&self) {
        let _ = self.confirm_tx.send(ConfirmationDecision::Accept);
    }

    pub fn reject(&self, reason: impl Into<String>) {
        let _ = self
            .confirm_tx
            .send(ConfirmationDecision::Reject(reason.into()));
    }
}

enum StepReport {
    /// Keep looping.
    Continue,
    /// The agent produced a plain message; wait for more input.
    AwaitUser,
    /// Finished or errored.
    Terminal,
}

enum ConfirmationFlow {
    Dispatched,
    PausedOut,
}

enum ChildWait {
    GotNote,
    Interrupted,
    NoChildren,
}

pub struct Conversation {
    id: ConversationId,
    agent: Agent,
    workspace: Arc<dyn Workspace>,
    options: ConversationOptions,
    log: EventLog,
    state: ConversationState,
    shared_status: Arc<StdMutex<ConversationStatus>>,
    observers: Vec<Arc<dyn EventObserver>>,
    stuck: StuckDetector,
    /// Actions parked for confirmation, in emission order.
    pending_actions: Vec<ActionEvent>,
    /// Finish actions from the same turn as parked actions; appended only
    /// once the parked siblings are dispatched or rejected.
    pending_finish: Vec<ActionEvent>,
    pause_requested: Arc<AtomicBool>,
    pause_notify: Arc<Notify>,
    confirm_tx: mpsc::UnboundedSender<ConfirmationDecision>,
    confirm_rx: mpsc::UnboundedReceiver<ConfirmationDecision>,
    child_tx: mpsc::UnboundedSender<ChildNote>,
    child_rx: mpsc::UnboundedReceiver<ChildNote>,
    coordinator: Option<Arc<DelegationCoordinator>>,
    last_observation_at: Instant,
    closed: bool,
}

impl Conversation {
    /// Create a conversation (or reopen a persisted one when the options
    /// point at an existing directory). The system prompt event is appended
    /// on first creation only.
    pub fn new(
        agent: Agent,
        workspace: Arc<dyn Workspace>,
        mut options: ConversationOptions,
    ) -> Result<Self> {
        let (log, id) = match &options.persistence_dir {
            Some(dir) => {
                let log = EventLog::persisted(dir)?;
                let snapshot = log.store().expect("persisted log has a store").read_state()?;
                let id = snapshot.map(|s| s.id).unwrap_or_default();
                (log, id)
            }
            None => (EventLog::in_memory(), ConversationId::new()),
        };
        let state = replay(id, options.confirmation_mode, log.events());
        let observers = std::mem::take(&mut options.callbacks);
        let stuck = StuckDetector::new(
            options.stuck_window,
            options.stuck_repeat_threshold,
            options.stuck_idle_seconds,
        );

        let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
        let (child_tx, child_rx) = mpsc::unbounded_channel();

        let mut conversation = Self {
            id,
            shared_status: Arc::new(StdMutex::new(state.status)),
            agent,
            workspace,
            options,
            log,
            state,
            observers,
            stuck,
            pending_actions: Vec::new(),
            pending_finish: Vec::new(),
            pause_requested: Arc::new(AtomicBool::new(false)),
            pause_notify: Arc::new(Notify::new()),
            confirm_tx,
            confirm_rx,
            child_tx,
            child_rx,
            coordinator: None,
            last_observation_at: Instant::now(),
            closed: false,
        };

        if conversation.log.is_empty() {
            let prompt = conversation.agent.system_prompt().to_string();
            let tools = conversation.agent.tools().schemas();
            conversation.append(Event::system_prompt(prompt, tools))?;
        }
        conversation.write_snapshot()?;
        Ok(conversation)
    }

    /// Attach a delegation coordinator, enabling the `delegate` tool.
    pub fn with_delegation(mut self, coordinator: Arc<DelegationCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn status(&self) -> ConversationStatus {
        self.state.status
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn handle(&self) -> ConversationHandle {
        ConversationHandle {
            pause_requested: self.pause_requested.clone(),
            pause_notify: self.pause_notify.clone(),
            confirm_tx: self.confirm_tx.clone(),
        }
    }

    pub(crate) fn status_cell(&self) -> Arc<StdMutex<ConversationStatus>> {
        self.shared_status.clone()
    }

    pub(crate) fn add_observer(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// Enqueue a user message. The next `run` call picks it up.
    pub fn send_message(&mut self, text: impl Into<String>) -> Result<()> {
        if self.closed {
            return Err(CoreError::ConversationClosed);
        }
        self.append(Event::user_message(text))?;
        Ok(())
    }

    /// Ask the condenser to compact at the next opportunity.
    pub fn request_condensation(&mut self) -> Result<()> {
        self.append(Event::condensation_request())?;
        Ok(())
    }

    /// Drive the agent until it finishes, errors, pauses, needs more input,
    /// or exhausts the step budget.
    pub async fn run(&mut self) -> Result<ConversationStatus> {
        if self.closed {
            return Err(CoreError::ConversationClosed);
        }
        self.pause_requested.store(false, Ordering::SeqCst);
        self.last_observation_at = Instant::now();
        let mut steps = 0;

        loop {
            self.drain_child_notes()?;

            if self.state.status.is_terminal() {
                return Ok(self.state.status);
            }

            if !self.pending_actions.is_empty() {
                self.set_status(ConversationStatus::WaitingForConfirmation);
                match self.handle_confirmation().await? {
                    ConfirmationFlow::Dispatched => continue,
                    ConfirmationFlow::PausedOut => return Ok(self.state.status),
                }
            }

            if self.pause_requested.load(Ordering::SeqCst) {
                self.append(Event::pause())?;
                info!(conversation = %self.id, "paused");
                return Ok(self.state.status);
            }

            if steps >= self.options.max_step_count {
                debug!(conversation = %self.id, steps, "step budget exhausted");
                return Ok(self.state.status);
            }

            steps += 1;
            self.set_status(ConversationStatus::Running);
            match self.step().await? {
                StepReport::Continue => {}
                StepReport::AwaitUser => {
                    if self.live_children() > 0 {
                        match self.wait_for_child_note().await {
                            ChildWait::GotNote | ChildWait::Interrupted => continue,
                            ChildWait::NoChildren => return Ok(self.state.status),
                        }
                    }
                    return Ok(self.state.status);
                }
                StepReport::Terminal => return Ok(self.state.status),
            }

            if let Some(reason) = self.stuck.check(self.log.events(), self.last_observation_at) {
                warn!(conversation = %self.id, ?reason, "stuck detector fired");
                self.append(Event::agent_error(STUCK_DETECTED, reason.describe()))?;
                return Ok(self.state.status);
            }
        }
    }

    /// One agent step: view to messages, one completion, then events for
    /// whatever the model produced, then dispatch and a condensation check.
    async fn step(&mut self) -> Result<StepReport> {
        let view = View::from_events(self.log.events());
        let request = self.agent.build_request(&view);

        let response = match self.agent.llm().complete(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(conversation = %self.id, error = %e, "llm call failed after retries");
                self.append(Event::agent_error(
                    LLM_FAILURE,
                    format!("llm call failed: {e}"),
                ))?;
                return Ok(StepReport::Terminal);
            }
        };

        let message = response.message;
        if message.tool_calls.is_empty() {
            self.append(Event::agent_message(message.content))?;
            return Ok(StepReport::AwaitUser);
        }

        let thought = {
            let text = message.text();
            (!text.is_empty()).then_some(text)
        };
        let response_id = LlmResponseId::new();
        let mut regular: Vec<ActionEvent> = Vec::new();
        let mut finishes: Vec<ActionEvent> = Vec::new();

        for call in &message.tool_calls {
            let arguments = call.parse_arguments().unwrap_or(serde_json::Value::Null);
            let action = ActionEvent {
                tool_name: call.name.clone(),
                tool_call_id: ToolCallId::new(call.id.clone()),
                arguments,
                thought: None,
                llm_response_id: response_id.clone(),
                metrics: None,
            };
            // A finish action appends only after its siblings resolve, so
            // the conversation never finishes with actions left dangling.
            if action.tool_name == FINISH_TOOL {
                finishes.push(action);
            } else {
                regular.push(action);
            }
        }
        // The first appended action carries the turn's thought; metrics ride
        // the last appended action of the turn.
        if let Some(first) = regular.first_mut().or_else(|| finishes.first_mut()) {
            first.thought = thought;
        }
        if let Some(last) = finishes.last_mut().or_else(|| regular.last_mut()) {
            last.metrics = Some(response.metrics.clone());
        }

        for action in &regular {
            self.append(Event::action(action.clone()))?;
        }

        if self.options.confirmation_mode && !regular.is_empty() {
            self.pending_actions = regular;
            self.pending_finish = finishes;
            // The run loop parks on the confirmation gate next.
            return Ok(StepReport::Continue);
        }

        for action in &regular {
            self.dispatch(action).await?;
        }

        if !finishes.is_empty() {
            for action in finishes {
                self.append(Event::action(action))?;
            }
            info!(conversation = %self.id, "finished");
            return Ok(StepReport::Terminal);
        }

        self.maybe_condense().await?;
        Ok(StepReport::Continue)
    }

    /// Execute one action and append its observation (or agent error).
    async fn dispatch(&mut self, action: &ActionEvent) -> Result<()> {
        debug!(conversation = %self.id, tool = %action.tool_name, "dispatching action");

        let output = if action.tool_name == DELEGATE_TOOL {
            match &self.coordinator {
                Some(coordinator) => {
                    let ctx = DelegateContext {
                        parent: self.id,
                        parent_tx: self.child_tx.clone(),
                        llm: self.agent.llm().clone(),
                        workspace: self.workspace.clone(),
                    };
                    coordinator.clone().handle_delegate(ctx, &action.arguments).await
                }
                None => ToolOutput::error("delegation is not enabled for this conversation"),
            }
        } else {
            self.agent
                .tools()
                .execute(&action.tool_name, action.arguments.clone())
                .await
        };

        if output.agent_error {
            let mut event = Event::agent_error("tool_execution", output.text);
            if let EventPayload::AgentError(e) = &mut event.payload {
                e.action_id = Some(action.tool_call_id.clone());
            }
            self.append(event)?;
        } else {
            self.append(Event::observation(ObservationEvent {
                tool_name: action.tool_name.clone(),
                action_id: action.tool_call_id.clone(),
                output: truncate_head_tail(&output.text, MAX_OBSERVATION_BYTES),
                data: output.data,
                is_error: output.is_error,
            }))?;
            self.last_observation_at = Instant::now();
        }
        Ok(())
    }

    /// Park until the caller accepts or rejects the pending actions, or a
    /// pause interrupts the wait. Pending actions survive a pause and are
    /// resolved on the next `run`.
    async fn handle_confirmation(&mut self) -> Result<ConfirmationFlow> {
        loop {
            if self.pause_requested.load(Ordering::SeqCst) {
                self.append(Event::pause())?;
                return Ok(ConfirmationFlow::PausedOut);
            }
            let decision = {
                let notify = self.pause_notify.clone();
                tokio::select! {
                    decision = self.confirm_rx.recv() => decision,
                    _ = notify.notified() => None,
                }
            };
            let Some(decision) = decision else { continue };

            let pending = std::mem::take(&mut self.pending_actions);
            match decision {
                ConfirmationDecision::Accept => {
                    info!(conversation = %self.id, count = pending.len(), "actions confirmed");
                    for action in &pending {
                        self.dispatch(action).await?;
                    }
                }
                ConfirmationDecision::Reject(reason) => {
                    info!(conversation = %self.id, %reason, "actions rejected");
                    for action in &pending {
                        self.append(Event::user_reject(
                            action.tool_name.clone(),
                            action.tool_call_id.clone(),
                            reason.clone(),
                        ))?;
                    }
                }
            }

            // Every sibling is resolved; a finish from the same turn may
            // land now. The run loop's terminal check ends the run.
            let deferred = std::mem::take(&mut self.pending_finish);
            if !deferred.is_empty() {
                for action in deferred {
                    self.append(Event::action(action))?;
                }
                info!(conversation = %self.id, "finished");
                return Ok(ConfirmationFlow::Dispatched);
            }

            self.maybe_condense().await?;
            return Ok(ConfirmationFlow::Dispatched);
        }
    }

    async fn maybe_condense(&mut self) -> Result<()> {
        let view = View::from_events(self.log.events());
        match self.agent.condenser().condense(&view).await {
            Ok(CondenserOutcome::Keep) => Ok(()),
            Ok(CondenserOutcome::Condense(condensation)) => {
                info!(conversation = %self.id, forgotten = condensation.forgotten_event_ids.len(), "condensation appended");
                self.append(Event::condensation(condensation))?;
                Ok(())
            }
            Err(e) => {
                self.append(Event::agent_error(
                    LLM_FAILURE,
                    format!("condenser failed: {e}"),
                ))?;
                Ok(())
            }
        }
    }

    fn live_children(&self) -> usize {
        self.coordinator
            .as_ref()
            .map(|c| c.live_children(self.id))
            .unwrap_or(0)
    }

    fn drain_child_notes(&mut self) -> Result<()> {
        while let Ok(note) = self.child_rx.try_recv() {
            self.append(Event::child_message(note.child, note.text))?;
        }
        Ok(())
    }

    /// Suspension point for delegation: wait for a child message, a pause,
    /// or all children winding down.
    async fn wait_for_child_note(&mut self) -> ChildWait {
        enum Woke {
            Note(Option<ChildNote>),
            Pause,
            Tick,
        }

        loop {
            if self.pause_requested.load(Ordering::SeqCst) {
                return ChildWait::Interrupted;
            }
            if self.live_children() == 0 {
                return ChildWait::NoChildren;
            }
            let woke = {
                let notify = self.pause_notify.clone();
                tokio::select! {
                    note = self.child_rx.recv() => Woke::Note(note),
                    _ = notify.notified() => Woke::Pause,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => Woke::Tick,
                }
            };
            match woke {
                Woke::Note(Some(note)) => {
                    if self.append(Event::child_message(note.child, note.text)).is_ok() {
                        return ChildWait::GotNote;
                    }
                    return ChildWait::Interrupted;
                }
                Woke::Note(None) | Woke::Pause => return ChildWait::Interrupted,
                // Re-check liveness; a child may have ended without a note.
                Woke::Tick => {}
            }
        }
    }

    /// Stop accepting work and tear everything down: children first, then
    /// tool executors (bash shells included). Safe to call twice.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator
                .close_children_of(self.id, self.options.close_grace)
                .await;
        }
        self.agent.tools().shutdown_all().await;
        self.closed = true;
        info!(conversation = %self.id, "closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn set_status(&mut self, status: ConversationStatus) {
        self.state.status = status;
        *self.shared_status.lock().expect("status cell poisoned") = status;
    }

    /// Append an event: durable first, then state fold, then observers.
    fn append(&mut self, event: Event) -> Result<usize> {
        let offset = self.log.append(event)?;
        let event = self.log.get(offset).expect("just appended");
        self.state.apply(event);
        *self.shared_status.lock().expect("status cell poisoned") = self.state.status;

        for observer in &self.observers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_event(event)
            }));
            if result.is_err() {
                warn!(conversation = %self.id, offset, "event observer panicked");
            }
        }

        self.write_snapshot()?;
        Ok(offset)
    }

    fn write_snapshot(&self) -> Result<()> {
        if let Some(store) = self.log.store() {
            store.write_state(&StateSnapshot {
                id: self.id,
                agent_spec: self.agent.spec(),
                confirmation_mode: self.options.confirmation_mode,
                last_offset: self.log.len(),
            })?;
        }
        Ok(())
    }
}
