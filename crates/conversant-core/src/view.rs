//! View: the ordered projection of the log that the LLM message list is
//! built from. At most one condensation is in effect at a time; the log
//! itself keeps every event.

use std::collections::HashSet;

use conversant_llm::{Content, LlmMessage, ToolCall};

use crate::event::{Event, EventPayload};

/// Read-only projection over a log's events.
pub struct View {
    events: Vec<Event>,
    /// A condensation request arrived after the last condensation.
    requested: bool,
}

impl View {
    /// Build the view: keep LLM-relevant events, apply the most recent
    /// condensation (drop forgotten events, splice the summary in).
    pub fn from_events(events: &[Event]) -> Self {
        let mut last_condensation = None;
        let mut last_condensation_at = None;
        let mut last_request_at = None;
        for (offset, event) in events.iter().enumerate() {
            match &event.payload {
                EventPayload::Condensation(c) => {
                    last_condensation = Some(c.clone());
                    last_condensation_at = Some(offset);
                }
                EventPayload::CondensationRequest => last_request_at = Some(offset),
                _ => {}
            }
        }
        let requested = match (last_request_at, last_condensation_at) {
            (Some(r), Some(c)) => r > c,
            (Some(_), None) => true,
            _ => false,
        };

        let forgotten: HashSet<&str> = last_condensation
            .as_ref()
            .map(|c| c.forgotten_event_ids.iter().map(|id| id.as_str()).collect())
            .unwrap_or_default();

        let mut kept: Vec<Event> = events
            .iter()
            .filter(|e| is_llm_relevant(e))
            .filter(|e| !forgotten.contains(e.id.as_str()))
            .cloned()
            .collect();

        if let Some(c) = &last_condensation {
            if let (Some(summary), Some(offset)) = (&c.summary, c.summary_offset) {
                let at = offset.min(kept.len());
                kept.insert(at, summary_event(summary));
            }
        }

        Self {
            events: kept,
            requested,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether an explicit condensation request is outstanding.
    pub fn condensation_requested(&self) -> bool {
        self.requested
    }

    /// Assemble the LLM message list. Sibling actions sharing an
    /// `llm_response_id` merge into one assistant message; observations,
    /// rejections, and addressed agent errors become tool results.
    pub fn to_messages(&self) -> Vec<LlmMessage> {
        let mut messages = Vec::with_capacity(self.events.len());
        let mut i = 0;
        while i < self.events.len() {
            let event = &self.events[i];
            match &event.payload {
                EventPayload::SystemPrompt(_) => {
                    // A fresh system prompt is prepended at request time.
                }
                EventPayload::Message(m) => {
                    messages.push(LlmMessage {
                        role: m.role,
                        content: m.content.clone(),
                        tool_calls: Vec::new(),
                        tool_call_id: None,
                    });
                }
                EventPayload::Action(first) => {
                    let response_id = first.llm_response_id.clone();
                    let mut content = Vec::new();
                    if let Some(thought) = &first.thought {
                        content.push(Content::text(thought.clone()));
                    }
                    let mut tool_calls = Vec::new();
                    while i < self.events.len() {
                        match &self.events[i].payload {
                            EventPayload::Action(a) if a.llm_response_id == response_id => {
                                tool_calls.push(ToolCall::new(
                                    a.tool_call_id.as_str(),
                                    &a.tool_name,
                                    &a.arguments,
                                ));
                                i += 1;
                            }
                            _ => break,
                        }
                    }
                    messages.push(LlmMessage::assistant(content, tool_calls));
                    continue;
                }
                EventPayload::Observation(o) => {
                    messages.push(LlmMessage::tool_result(o.action_id.as_str(), &o.output));
                }
                EventPayload::UserReject(r) => {
                    messages.push(LlmMessage::tool_result(
                        r.action_id.as_str(),
                        format!("Action rejected by user: {}", r.rejection_reason),
                    ));
                }
                EventPayload::AgentError(e) => match &e.action_id {
                    Some(action_id) => messages.push(LlmMessage::tool_result(
                        action_id.as_str(),
                        format!("Error ({}): {}", e.error_kind, e.message),
                    )),
                    None => messages.push(LlmMessage::user(format!(
                        "Error ({}): {}",
                        e.error_kind, e.message
                    ))),
                },
                EventPayload::Pause
                | EventPayload::CondensationRequest
                | EventPayload::Condensation(_) => {}
            }
            i += 1;
        }
        messages
    }
}

/// Event kinds that contribute to the LLM message list.
fn is_llm_relevant(event: &Event) -> bool {
    !matches!(
        event.payload,
        EventPayload::Pause | EventPayload::CondensationRequest | EventPayload::Condensation(_)
    )
}

fn summary_event(summary: &str) -> Event {
    let mut event = Event::user_message(format!("Conversation summary: {summary}"));
    event.source = crate::event::EventSource::Environment;
    event
}
