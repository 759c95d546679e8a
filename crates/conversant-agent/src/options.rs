//! Conversation configuration.

use crate::observer::EventObserver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ConversationOptions {
    /// Bounded step budget per `run` call.
    pub max_step_count: usize,
    /// Park actions for user approval before dispatch.
    pub confirmation_mode: bool,
    /// Stuck detection: window of trailing events that must all be agent
    /// errors to fire.
    pub stuck_window: usize,
    /// Stuck detection: identical consecutive actions that fire.
    pub stuck_repeat_threshold: usize,
    /// Stuck detection: seconds without any observation progress.
    pub stuck_idle_seconds: u64,
    /// Directory for the persisted event log; in-memory when unset.
    pub persistence_dir: Option<PathBuf>,
    /// Observers notified synchronously on every append.
    pub callbacks: Vec<Arc<dyn EventObserver>>,
    /// How long `close` waits for children to wind down.
    pub close_grace: Duration,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            max_step_count: 50,
            confirmation_mode: false,
            stuck_window: 6,
            stuck_repeat_threshold: 4,
            stuck_idle_seconds: 300,
            persistence_dir: None,
            callbacks: Vec::new(),
            close_grace: Duration::from_secs(5),
        }
    }
}

impl ConversationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_step_count(mut self, steps: usize) -> Self {
        self.max_step_count = steps;
        self
    }

    pub fn with_confirmation_mode(mut self, on: bool) -> Self {
        self.confirmation_mode = on;
        self
    }

    pub fn with_stuck_repeat_threshold(mut self, threshold: usize) -> Self {
        self.stuck_repeat_threshold = threshold;
        self
    }

    pub fn with_stuck_window(mut self, window: usize) -> Self {
        self.stuck_window = window;
        self
    }

    pub fn with_stuck_idle_seconds(mut self, seconds: u64) -> Self {
        self.stuck_idle_seconds = seconds;
        self
    }

    pub fn with_persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persistence_dir = Some(dir.into());
        self
    }

    pub fn with_callback(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.callbacks.push(observer);
        self
    }
}
