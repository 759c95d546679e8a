//! Stuck detection: halts a conversation exhibiting non-productive
//! repetition or silence.

use conversant_core::{Event, EventPayload};
use conversant_llm::Role;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StuckReason {
    /// The trailing window of events is all agent errors.
    RepeatedErrors,
    /// The same action payload repeated too many times in a row.
    RepeatedAction,
    /// No observation progress for too long.
    NoProgress,
}

impl StuckReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::RepeatedErrors => "every recent event is an agent error",
            Self::RepeatedAction => "the same action was repeated with identical arguments",
            Self::NoProgress => "no observation progress within the idle window",
        }
    }
}

pub struct StuckDetector {
    window: usize,
    repeat_threshold: usize,
    idle: Duration,
}

impl StuckDetector {
    pub fn new(window: usize, repeat_threshold: usize, idle_seconds: u64) -> Self {
        Self {
            window: window.max(1),
            repeat_threshold: repeat_threshold.max(2),
            idle: Duration::from_secs(idle_seconds),
        }
    }

    /// Sliding-window check over the event sequence.
    pub fn check(&self, events: &[Event], last_observation_at: Instant) -> Option<StuckReason> {
        if self.all_recent_errors(events) {
            return Some(StuckReason::RepeatedErrors);
        }
        if self.action_repeats(events) {
            return Some(StuckReason::RepeatedAction);
        }
        if last_observation_at.elapsed() >= self.idle {
            return Some(StuckReason::NoProgress);
        }
        None
    }

    fn all_recent_errors(&self, events: &[Event]) -> bool {
        if events.len() < self.window {
            return false;
        }
        events[events.len() - self.window..]
            .iter()
            .all(Event::is_agent_error)
    }

    /// Walk backwards collecting actions; a user message resets the streak.
    fn action_repeats(&self, events: &[Event]) -> bool {
        let mut seen: Option<(&str, &serde_json::Value)> = None;
        let mut count = 0;
        for event in events.iter().rev() {
            match &event.payload {
                EventPayload::Action(a) => {
                    match seen {
                        Some((name, args)) => {
                            if name != a.tool_name || *args != a.arguments {
                                return false;
                            }
                        }
                        None => seen = Some((&a.tool_name, &a.arguments)),
                    }
                    count += 1;
                    if count >= self.repeat_threshold {
                        return true;
                    }
                }
                EventPayload::Message(m) if m.role == Role::User => return false,
                _ => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conversant_core::{ActionEvent, LlmResponseId, ObservationEvent, ToolCallId};

    fn action(command: &str) -> Event {
        Event::action(ActionEvent {
            tool_name: "bash".into(),
            tool_call_id: ToolCallId::new("call"),
            arguments: serde_json::json!({ "command": command }),
            thought: None,
            llm_response_id: LlmResponseId::new(),
            metrics: None,
        })
    }

    fn observation() -> Event {
        Event::observation(ObservationEvent {
            tool_name: "bash".into(),
            action_id: ToolCallId::new("call"),
            output: "out".into(),
            data: None,
            is_error: false,
        })
    }

    #[test]
    fn fires_on_identical_action_streak() {
        let detector = StuckDetector::new(6, 3, 300);
        let events = vec![
            Event::user_message("go"),
            action("ls"),
            observation(),
            action("ls"),
            observation(),
            action("ls"),
        ];
        assert_eq!(
            detector.check(&events, Instant::now()),
            Some(StuckReason::RepeatedAction)
        );
    }

    #[test]
    fn different_arguments_break_the_streak() {
        let detector = StuckDetector::new(6, 3, 300);
        let events = vec![action("ls"), observation(), action("pwd"), action("ls")];
        assert_eq!(detector.check(&events, Instant::now()), None);
    }

    #[test]
    fn user_message_resets_the_streak() {
        let detector = StuckDetector::new(6, 2, 300);
        let events = vec![
            action("ls"),
            Event::user_message("try again differently"),
            action("ls"),
        ];
        assert_eq!(detector.check(&events, Instant::now()), None);
    }

    #[test]
    fn fires_when_window_is_all_errors() {
        let detector = StuckDetector::new(3, 10, 300);
        let events = vec![
            Event::user_message("go"),
            Event::agent_error("tool_execution", "boom"),
            Event::agent_error("tool_execution", "boom"),
            Event::agent_error("tool_execution", "boom"),
        ];
        assert_eq!(
            detector.check(&events, Instant::now()),
            Some(StuckReason::RepeatedErrors)
        );
    }

    #[test]
    fn fires_after_idle_window() {
        let detector = StuckDetector::new(6, 3, 0);
        assert_eq!(
            detector.check(&[], Instant::now() - Duration::from_secs(1)),
            Some(StuckReason::NoProgress)
        );
    }
}
