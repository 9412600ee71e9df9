use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tracing::warn;

use super::{
    HistorySnapshot, RegistryDoc, SessionEntry, SessionFields, WindowEntry, WindowFields,
    MAX_MONITORING_NOTES,
};

/// Default retention for history snapshots, in days.
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Persistent registry of session and window metadata.
///
/// The whole document is loaded into memory at open and rewritten to disk
/// synchronously on every mutation. Single-writer discipline is assumed;
/// there is no file locking, and a concurrent external writer would corrupt
/// state.
pub struct RegistryStore {
    registry_path: PathBuf,
    history_dir: PathBuf,
    doc: RegistryDoc,
}

impl RegistryStore {
    /// Open the registry rooted at `dir`, creating the layout on first use.
    /// An unreadable document is not fatal: the store logs a warning and
    /// starts fresh.
    pub fn open(dir: &Path) -> Result<Self> {
        let history_dir = dir.join("history");
        fs::create_dir_all(&history_dir)
            .with_context(|| format!("Failed to create registry directory {}", dir.display()))?;

        let registry_path = dir.join("sessions.json");
        let doc = match fs::read_to_string(&registry_path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("registry document unreadable, starting fresh: {}", e);
                    RegistryDoc::default()
                }
            },
            Err(_) => RegistryDoc::default(),
        };

        Ok(Self {
            registry_path,
            history_dir,
            doc,
        })
    }

    fn save(&mut self) -> Result<()> {
        self.doc.last_updated = Some(Utc::now());
        let json = serde_json::to_string_pretty(&self.doc)?;
        fs::write(&self.registry_path, json).with_context(|| {
            format!("Failed to write registry {}", self.registry_path.display())
        })
    }

    /// Register or update a session. Missing entries are created; present
    /// fields overwrite, absent fields are untouched. `last_seen` is
    /// stamped on every call.
    pub fn upsert_session(&mut self, name: &str, fields: SessionFields) -> Result<()> {
        let entry = self
            .doc
            .sessions
            .entry(name.to_string())
            .or_default();
        entry.apply(fields);
        entry.last_seen = Some(Utc::now());
        self.save()
    }

    /// Register or update a window, creating its session entry if needed.
    /// `last_updated` is stamped on every call.
    pub fn upsert_window(&mut self, session: &str, index: u32, fields: WindowFields) -> Result<()> {
        let session_entry = self
            .doc
            .sessions
            .entry(session.to_string())
            .or_default();
        let entry = session_entry
            .windows
            .entry(index.to_string())
            .or_default();
        entry.apply(fields);
        entry.last_updated = Some(Utc::now());
        self.save()
    }

    /// `None` means "never registered", which is distinct from "exists in
    /// the multiplexer but unregistered".
    pub fn get_session(&self, name: &str) -> Option<&SessionEntry> {
        self.doc.sessions.get(name)
    }

    pub fn get_window(&self, session: &str, index: u32) -> Option<&WindowEntry> {
        self.doc
            .sessions
            .get(session)?
            .windows
            .get(&index.to_string())
    }

    /// Push a monitoring note onto a window's bounded note list. Returns
    /// `Ok(false)` without writing when the window was never registered.
    pub fn append_note(&mut self, session: &str, index: u32, note: &str) -> Result<bool> {
        let Some(window) = self
            .doc
            .sessions
            .get_mut(session)
            .and_then(|s| s.windows.get_mut(&index.to_string()))
        else {
            return Ok(false);
        };

        window.monitoring_notes.push(super::MonitoringNote {
            timestamp: Utc::now(),
            note: note.to_string(),
        });
        let overflow = window
            .monitoring_notes
            .len()
            .saturating_sub(MAX_MONITORING_NOTES);
        if overflow > 0 {
            window.monitoring_notes.drain(..overflow);
        }

        self.save()?;
        Ok(true)
    }

    /// Write one immutable history snapshot. The file name carries second
    /// resolution; two checkpoints of the same window within one second
    /// collide and the later write wins.
    pub fn checkpoint(
        &self,
        session: &str,
        index: u32,
        content: &str,
        analysis: &str,
    ) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .history_dir
            .join(format!("{}_{}_{}.json", session, index, stamp));

        let snapshot = HistorySnapshot {
            session: session.to_string(),
            window: index,
            timestamp: Utc::now(),
            content: content.to_string(),
            analysis: analysis.to_string(),
            window_info: self.get_window(session, index).cloned(),
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
        Ok(path)
    }

    /// Delete history snapshots whose modification time precedes
    /// `now - days`. Returns the number of files removed.
    pub fn purge_history_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        self.purge_history_before(cutoff)
    }

    fn purge_history_before(&self, cutoff: SystemTime) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.history_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("could not purge {}: {}", path.display(), e);
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Formatted overview of every registered session and window.
    pub fn summary(&self) -> String {
        if self.doc.sessions.is_empty() {
            return "No sessions registered yet.".to_string();
        }

        let updated = self
            .doc
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "Never".to_string());

        let mut lines = vec![
            format!("Session Registry (Updated: {})", updated),
            "=".repeat(60),
        ];

        for (name, session) in &self.doc.sessions {
            lines.push(String::new());
            lines.push(format!("Session: {}", name));
            lines.push(format!(
                "  Purpose: {}",
                non_empty(&session.purpose, "Not specified")
            ));
            lines.push(format!(
                "  Current Task: {}",
                non_empty(&session.current_task, "None")
            ));
            lines.push(format!(
                "  Working Dir: {}",
                non_empty(&session.working_directory, "Unknown")
            ));
            lines.push(format!("  Windows: {}", session.windows.len()));

            for (index, window) in &session.windows {
                lines.push(format!(
                    "    Window {}: {}",
                    index,
                    non_empty(&window.name, "unnamed")
                ));
                lines.push(format!(
                    "      Purpose: {}",
                    non_empty(&window.purpose, "Not specified")
                ));
                if let Some(latest) = window.monitoring_notes.last() {
                    let note: String = latest.note.chars().take(60).collect();
                    lines.push(format!("      Latest: {}...", note));
                }
            }
        }

        lines.join("\n")
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> RegistryStore {
        RegistryStore::open(dir.path()).unwrap()
    }

    #[test]
    fn test_upsert_window_merges_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        store
            .upsert_window(
                "dev",
                0,
                WindowFields {
                    name: Some("x".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(store.get_window("dev", 0).unwrap().name, "x");

        store
            .upsert_window(
                "dev",
                0,
                WindowFields {
                    purpose: Some("y".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let window = store.get_window("dev", 0).unwrap();
        assert_eq!(window.name, "x");
        assert_eq!(window.purpose, "y");
    }

    #[test]
    fn test_unknown_keys_survive_merges() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        let fields: SessionFields =
            serde_json::from_str(r#"{"purpose": "api work", "deploy_target": "staging"}"#)
                .unwrap();
        store.upsert_session("dev", fields).unwrap();

        let session = store.get_session("dev").unwrap();
        assert_eq!(session.purpose, "api work");
        assert_eq!(
            session.extra.get("deploy_target").and_then(|v| v.as_str()),
            Some("staging")
        );
    }

    #[test]
    fn test_registry_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = open_store(&dir);
            store
                .upsert_session(
                    "dev",
                    SessionFields {
                        purpose: Some("backend".to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        let store = open_store(&dir);
        assert_eq!(store.get_session("dev").unwrap().purpose, "backend");
        assert!(store.get_session("dev").unwrap().last_seen.is_some());
    }

    #[test]
    fn test_corrupt_document_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sessions.json"), "{ broken").unwrap();
        let store = open_store(&dir);
        assert!(store.get_session("dev").is_none());
        assert_eq!(store.summary(), "No sessions registered yet.");
    }

    #[test]
    fn test_append_note_caps_at_ten_oldest_first_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        store
            .upsert_window("dev", 1, WindowFields::default())
            .unwrap();

        for i in 0..15 {
            assert!(store.append_note("dev", 1, &format!("note {}", i)).unwrap());
        }

        let notes = &store.get_window("dev", 1).unwrap().monitoring_notes;
        assert_eq!(notes.len(), MAX_MONITORING_NOTES);
        assert_eq!(notes.first().unwrap().note, "note 5");
        assert_eq!(notes.last().unwrap().note, "note 14");
    }

    #[test]
    fn test_append_note_to_unregistered_window_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        assert!(!store.append_note("ghost", 0, "hello").unwrap());
    }

    #[test]
    fn test_checkpoint_writes_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        store
            .upsert_window(
                "dev",
                0,
                WindowFields {
                    name: Some("editor".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let path = store
            .checkpoint("dev", 0, "captured output", "looks healthy")
            .unwrap();
        assert!(path.exists());

        let raw = fs::read_to_string(&path).unwrap();
        let snapshot: HistorySnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot.session, "dev");
        assert_eq!(snapshot.window, 0);
        assert_eq!(snapshot.content, "captured output");
        assert_eq!(snapshot.analysis, "looks healthy");
        assert_eq!(snapshot.window_info.unwrap().name, "editor");
    }

    #[test]
    fn test_purge_honors_cutoff_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.checkpoint("dev", 0, "old content", "").unwrap();

        // A cutoff after the file's mtime deletes it; one before keeps it.
        let kept = store
            .purge_history_before(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        assert_eq!(kept, 0);

        let removed = store
            .purge_history_before(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        assert_eq!(removed, 1);

        // Default retention keeps a fresh snapshot.
        store.checkpoint("dev", 1, "new content", "").unwrap();
        assert_eq!(
            store.purge_history_older_than(DEFAULT_RETENTION_DAYS).unwrap(),
            0
        );
    }

    #[test]
    fn test_summary_lists_sessions_and_notes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        store
            .upsert_session(
                "dev",
                SessionFields {
                    purpose: Some("backend".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .upsert_window(
                "dev",
                0,
                WindowFields {
                    name: Some("editor".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        store.append_note("dev", 0, "agent went idle").unwrap();

        let summary = store.summary();
        assert!(summary.contains("Session: dev"));
        assert!(summary.contains("Purpose: backend"));
        assert!(summary.contains("Window 0: editor"));
        assert!(summary.contains("agent went idle"));
    }
}
