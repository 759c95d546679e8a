//! Event observers: registered at construction, notified synchronously for
//! every appended event, before the next step begins.

use conversant_core::Event;
use std::sync::{Arc, Mutex};

/// One-method observer interface. Failures inside an observer are logged and
/// never abort the conversation.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Collects every event it sees. Useful in tests and demos.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<Event>>,
}

impl CollectingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("observer poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("observer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventObserver for CollectingObserver {
    fn on_event(&self, event: &Event) {
        self.events.lock().expect("observer poisoned").push(event.clone());
    }
}
