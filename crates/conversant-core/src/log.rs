//! The append-only event log: O(1) append, O(1) random access by offset,
//! optional file-backed persistence.

use std::ops::Range;
use std::path::Path;

use crate::error::Result;
use crate::event::{Event, EventId};
use crate::store::FileStore;

/// Totally ordered sequence of events. Single-writer by construction: only
/// the owning conversation's task appends.
pub struct EventLog {
    events: Vec<Event>,
    store: Option<FileStore>,
}

impl EventLog {
    /// In-memory log, nothing touches disk.
    pub fn in_memory() -> Self {
        Self {
            events: Vec::new(),
            store: None,
        }
    }

    /// Persisted log rooted at a conversation directory. Existing event files
    /// are loaded eagerly in offset order; a corrupt file refuses to open.
    pub fn persisted(dir: impl AsRef<Path>) -> Result<Self> {
        let store = FileStore::open(dir)?;
        let events = store.scan(0)?;
        Ok(Self {
            events,
            store: Some(store),
        })
    }

    pub fn store(&self) -> Option<&FileStore> {
        self.store.as_ref()
    }

    /// Append an event, durable before return when persistence is enabled.
    pub fn append(&mut self, event: Event) -> Result<usize> {
        let offset = self.events.len();
        if let Some(store) = &self.store {
            store.write_event(offset, &event)?;
        }
        self.events.push(event);
        Ok(offset)
    }

    pub fn get(&self, offset: usize) -> Option<&Event> {
        self.events.get(offset)
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn iter_range(&self, range: Range<usize>) -> impl Iterator<Item = &Event> {
        let end = range.end.min(self.events.len());
        let start = range.start.min(end);
        self.events[start..end].iter()
    }

    pub fn find_by_id(&self, id: &EventId) -> Option<(usize, &Event)> {
        self.events
            .iter()
            .enumerate()
            .find(|(_, e)| &e.id == id)
    }
}
