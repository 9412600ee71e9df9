use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Most recent entries retained per journal.
pub const MAX_JOURNAL_ENTRIES: usize = 100;

/// A window observed idle during a monitoring iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleAgentEntry {
    pub session: String,
    pub window: u32,
    pub timestamp: DateTime<Utc>,
    pub iteration: u64,
}

/// Summary of one monitoring iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationEntry {
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    pub sessions_checked: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalDoc<T> {
    last_updated: Option<DateTime<Utc>>,
    entries: Vec<T>,
}

impl<T> Default for JournalDoc<T> {
    fn default() -> Self {
        Self {
            last_updated: None,
            entries: Vec::new(),
        }
    }
}

/// Append-only bounded journal persisted as a single JSON document.
/// Entries are immutable once written; only the oldest are evicted when
/// the cap is exceeded. An unreadable document starts fresh.
pub struct BoundedJournal<T> {
    path: PathBuf,
    _entry: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> BoundedJournal<T> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _entry: PhantomData,
        }
    }

    fn load(&self) -> JournalDoc<T> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(
                        "journal {} unreadable, starting fresh: {}",
                        self.path.display(),
                        e
                    );
                    JournalDoc::default()
                }
            },
            Err(_) => JournalDoc::default(),
        }
    }

    /// Append one entry, evicting the oldest past the cap, and rewrite the
    /// document.
    pub fn push(&self, entry: T) -> Result<()> {
        let mut doc = self.load();
        doc.entries.push(entry);
        let overflow = doc.entries.len().saturating_sub(MAX_JOURNAL_ENTRIES);
        if overflow > 0 {
            doc.entries.drain(..overflow);
        }
        doc.last_updated = Some(Utc::now());

        let json = serde_json::to_string_pretty(&doc)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write journal {}", self.path.display()))
    }

    pub fn entries(&self) -> Vec<T> {
        self.load().entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let journal = BoundedJournal::new(dir.path().join("idle_agents.json"));

        journal
            .push(IdleAgentEntry {
                session: "dev".to_string(),
                window: 1,
                timestamp: Utc::now(),
                iteration: 3,
            })
            .unwrap();

        let entries = journal.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session, "dev");
        assert_eq!(entries[0].iteration, 3);
    }

    #[test]
    fn test_cap_evicts_oldest_preserving_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = BoundedJournal::new(dir.path().join("orchestrator_log.json"));

        for i in 0..105u64 {
            journal
                .push(IterationEntry {
                    iteration: i,
                    timestamp: Utc::now(),
                    sessions_checked: vec!["dev".to_string()],
                })
                .unwrap();
        }

        let entries = journal.entries();
        assert_eq!(entries.len(), MAX_JOURNAL_ENTRIES);
        assert_eq!(entries.first().unwrap().iteration, 5);
        assert_eq!(entries.last().unwrap().iteration, 104);
    }

    #[test]
    fn test_corrupt_journal_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idle_agents.json");
        fs::write(&path, "not json at all").unwrap();

        let journal: BoundedJournal<IdleAgentEntry> = BoundedJournal::new(path);
        assert!(journal.entries().is_empty());

        journal
            .push(IdleAgentEntry {
                session: "dev".to_string(),
                window: 0,
                timestamp: Utc::now(),
                iteration: 1,
            })
            .unwrap();
        assert_eq!(journal.entries().len(), 1);
    }
}
