//! On-disk layout for a persisted conversation: one JSON document per event
//! under `events/`, plus an atomically written `state.json` snapshot.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::event::Event;
use crate::state::{AgentSpec, ConversationId};

const STATE_FILE: &str = "state.json";
const EVENTS_DIR: &str = "events";

/// Contents of `state.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub id: ConversationId,
    pub agent_spec: AgentSpec,
    pub confirmation_mode: bool,
    /// Offset the next append will receive, at snapshot time.
    pub last_offset: usize,
}

/// File-backed event store for one conversation directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (or create) a conversation directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(EVENTS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn event_path(&self, offset: usize) -> PathBuf {
        self.root.join(EVENTS_DIR).join(format!("{offset:08}.json"))
    }

    /// Write one event, durable before return.
    pub fn write_event(&self, offset: usize, event: &Event) -> Result<()> {
        let path = self.event_path(offset);
        let json = serde_json::to_vec_pretty(event)?;
        let mut file = fs::File::create(&path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read one event; corruption fails fast with the offending offset.
    pub fn read_event(&self, offset: usize) -> Result<Event> {
        let path = self.event_path(offset);
        let bytes = fs::read(&path)
            .map_err(|e| CoreError::corruption(offset, format!("unreadable event file: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::corruption(offset, format!("unparseable event: {e}")))
    }

    /// Read every event in offset order, starting at `from`. Fails fast on a
    /// gap in the numbering or an unparseable file; no silent skips.
    pub fn scan(&self, from: usize) -> Result<Vec<Event>> {
        let mut offsets = Vec::new();
        for entry in fs::read_dir(self.root.join(EVENTS_DIR))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let offset: usize = stem.parse().map_err(|_| {
                CoreError::corruption(0, format!("unexpected file in events dir: {name}"))
            })?;
            if offset >= from {
                offsets.push(offset);
            }
        }
        offsets.sort_unstable();

        let mut events = Vec::with_capacity(offsets.len());
        for (i, offset) in offsets.iter().enumerate() {
            let expected = from + i;
            if *offset != expected {
                return Err(CoreError::corruption(
                    expected,
                    format!("missing event file, found offset {offset} instead"),
                ));
            }
            events.push(self.read_event(*offset)?);
        }
        debug!(count = events.len(), from, "scanned event files");
        Ok(events)
    }

    /// Write `state.json` atomically: temp file in the same directory, then
    /// rename over the old snapshot.
    pub fn write_state(&self, snapshot: &StateSnapshot) -> Result<()> {
        let tmp = self.root.join(format!("{STATE_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(snapshot)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.root.join(STATE_FILE))?;
        Ok(())
    }

    /// Read the snapshot, if one was ever written.
    pub fn read_state(&self) -> Result<Option<StateSnapshot>> {
        let path = self.root.join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::corruption(0, format!("unparseable state.json: {e}")))?;
        Ok(Some(snapshot))
    }
}
