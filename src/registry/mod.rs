mod journal;
mod store;

pub use journal::{BoundedJournal, IdleAgentEntry, IterationEntry, MAX_JOURNAL_ENTRIES};
pub use store::{RegistryStore, DEFAULT_RETENTION_DAYS};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Most recent monitoring notes retained per window.
pub const MAX_MONITORING_NOTES: usize = 10;

/// The persisted registry document: sessions, their windows, and metadata
/// the multiplexer itself does not track. Entries are only ever appended or
/// updated; a window that closes leaves its entry behind as history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDoc {
    pub last_updated: Option<DateTime<Utc>>,
    pub sessions: BTreeMap<String, SessionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEntry {
    pub created: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub purpose: String,
    pub working_directory: String,
    pub current_task: String,
    pub notes: Vec<String>,
    /// Keyed by window index; may be a superset of the live window set.
    pub windows: BTreeMap<String, WindowEntry>,
    /// Unknown keys survive merges rather than being dropped.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            created: Utc::now(),
            last_seen: None,
            purpose: String::new(),
            working_directory: String::new(),
            current_task: String::new(),
            notes: Vec::new(),
            windows: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowEntry {
    pub created: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub name: String,
    pub purpose: String,
    pub working_directory: String,
    pub active_command: String,
    pub last_activity: String,
    /// Bounded FIFO of monitoring notes, oldest evicted first.
    pub monitoring_notes: Vec<MonitoringNote>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for WindowEntry {
    fn default() -> Self {
        Self {
            created: Utc::now(),
            last_updated: None,
            name: String::new(),
            purpose: String::new(),
            working_directory: String::new(),
            active_command: String::new(),
            last_activity: String::new(),
            monitoring_notes: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringNote {
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

/// Partial session update: set fields overwrite, unset fields are left
/// alone, unknown keys are merged in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionFields {
    pub purpose: Option<String>,
    pub working_directory: Option<String>,
    pub current_task: Option<String>,
    pub notes: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionEntry {
    pub fn apply(&mut self, fields: SessionFields) {
        if let Some(purpose) = fields.purpose {
            self.purpose = purpose;
        }
        if let Some(working_directory) = fields.working_directory {
            self.working_directory = working_directory;
        }
        if let Some(current_task) = fields.current_task {
            self.current_task = current_task;
        }
        if let Some(notes) = fields.notes {
            self.notes = notes;
        }
        for (key, value) in fields.extra {
            self.extra.insert(key, value);
        }
    }
}

/// Partial window update, same merge semantics as [`SessionFields`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WindowFields {
    pub name: Option<String>,
    pub purpose: Option<String>,
    pub working_directory: Option<String>,
    pub active_command: Option<String>,
    pub last_activity: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WindowEntry {
    pub fn apply(&mut self, fields: WindowFields) {
        if let Some(name) = fields.name {
            self.name = name;
        }
        if let Some(purpose) = fields.purpose {
            self.purpose = purpose;
        }
        if let Some(working_directory) = fields.working_directory {
            self.working_directory = working_directory;
        }
        if let Some(active_command) = fields.active_command {
            self.active_command = active_command;
        }
        if let Some(last_activity) = fields.last_activity {
            self.last_activity = last_activity;
        }
        for (key, value) in fields.extra {
            self.extra.insert(key, value);
        }
    }
}

/// One immutable checkpoint of a window's content and registry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub session: String,
    pub window: u32,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub analysis: String,
    pub window_info: Option<WindowEntry>,
}
