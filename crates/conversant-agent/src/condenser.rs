//! Condensers: lossy compaction of a view into an equivalent shorter view.
//!
//! A condenser never mutates the log. It either keeps the view or returns a
//! Condensation event for the engine to append; the next view is derived
//! from it. The log stays a complete audit trail.

use conversant_core::{Condensation, CoreError, Event, EventPayload, Result, View};
use conversant_llm::{LlmClient, LlmMessage, LlmRequest};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one condenser decision.
pub enum CondenserOutcome {
    /// The view is fine as-is.
    Keep,
    /// Append this condensation and rebuild the view.
    Condense(Condensation),
}

#[async_trait::async_trait]
pub trait Condenser: Send + Sync {
    async fn condense(&self, view: &View) -> Result<CondenserOutcome>;
}

/// Returns the view unchanged. The default.
pub struct NoOpCondenser;

#[async_trait::async_trait]
impl Condenser for NoOpCondenser {
    async fn condense(&self, _view: &View) -> Result<CondenserOutcome> {
        Ok(CondenserOutcome::Keep)
    }
}

/// Summarizes the oldest span of the view with a separate LLM call once the
/// view grows past `max_view_size` (or a condensation was requested).
pub struct LlmSummarizingCondenser {
    llm: Arc<dyn LlmClient>,
    /// View length that triggers compaction.
    pub max_view_size: usize,
    /// Events at the head that are always kept (system prompt, first task).
    pub keep_first: usize,
}

impl LlmSummarizingCondenser {
    pub fn new(llm: Arc<dyn LlmClient>, max_view_size: usize, keep_first: usize) -> Self {
        Self {
            llm,
            max_view_size: max_view_size.max(4),
            keep_first,
        }
    }

    /// The span to forget: everything between the kept head and the kept
    /// tail, minus observations whose action stays visible.
    fn forgotten_span<'a>(&self, view: &'a View) -> Vec<&'a Event> {
        let keep_tail = (self.max_view_size / 2).saturating_sub(self.keep_first).max(1);
        let end = view.len().saturating_sub(keep_tail);
        let span = &view.events()[self.keep_first.min(end)..end];

        let forgotten_action_calls: HashSet<&str> = span
            .iter()
            .filter_map(|e| e.as_action())
            .map(|a| a.tool_call_id.as_str())
            .collect();

        span.iter()
            .filter(|e| match &e.payload {
                // An observation only goes when its action goes with it.
                EventPayload::Observation(o) => {
                    forgotten_action_calls.contains(o.action_id.as_str())
                }
                EventPayload::UserReject(r) => {
                    forgotten_action_calls.contains(r.action_id.as_str())
                }
                _ => true,
            })
            .collect()
    }

    async fn summarize(&self, span: &[&Event]) -> Result<String> {
        let mut transcript = String::new();
        for event in span {
            match &event.payload {
                EventPayload::Message(m) => {
                    for part in &m.content {
                        if let Some(text) = part.as_text() {
                            transcript.push_str(&format!("{:?}: {text}\n", m.role));
                        }
                    }
                }
                EventPayload::Action(a) => {
                    transcript.push_str(&format!("action {}({})\n", a.tool_name, a.arguments));
                }
                EventPayload::Observation(o) => {
                    transcript.push_str(&format!("result: {}\n", o.output));
                }
                EventPayload::AgentError(e) => {
                    transcript.push_str(&format!("error: {}\n", e.message));
                }
                _ => {}
            }
        }

        let request = LlmRequest::new(vec![
            LlmMessage::system(
                "You condense agent conversation history. Summarize the \
                 following events, preserving task intent, key findings, file \
                 paths, and unresolved problems. Be concise.",
            ),
            LlmMessage::user(transcript),
        ]);
        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| CoreError::llm_failure(e.kind()))?;
        Ok(response.message.text())
    }
}

#[async_trait::async_trait]
impl Condenser for LlmSummarizingCondenser {
    async fn condense(&self, view: &View) -> Result<CondenserOutcome> {
        if view.len() <= self.max_view_size && !view.condensation_requested() {
            return Ok(CondenserOutcome::Keep);
        }
        let span = self.forgotten_span(view);
        if span.is_empty() {
            debug!("nothing to condense despite trigger");
            return Ok(CondenserOutcome::Keep);
        }

        let summary = self.summarize(&span).await?;
        info!(forgotten = span.len(), "condensing view");
        Ok(CondenserOutcome::Condense(Condensation {
            forgotten_event_ids: span.iter().map(|e| e.id.clone()).collect(),
            summary: Some(summary),
            summary_offset: Some(self.keep_first),
        }))
    }
}

/// Chains condensers; the first one that decides to condense wins.
pub struct CondenserPipeline {
    stages: Vec<Arc<dyn Condenser>>,
}

impl CondenserPipeline {
    pub fn new(stages: Vec<Arc<dyn Condenser>>) -> Self {
        Self { stages }
    }
}

#[async_trait::async_trait]
impl Condenser for CondenserPipeline {
    async fn condense(&self, view: &View) -> Result<CondenserOutcome> {
        for stage in &self.stages {
            if let CondenserOutcome::Condense(c) = stage.condense(view).await? {
                return Ok(CondenserOutcome::Condense(c));
            }
        }
        Ok(CondenserOutcome::Keep)
    }
}
