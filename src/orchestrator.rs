use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::assistant::{AssistantClient, CommandSuggestion, SafetyLevel};
use crate::config::MonitorConfig;
use crate::health::{self, Verdict};
use crate::registry::{RegistryStore, SessionEntry, SessionFields, WindowEntry, WindowFields};
use crate::tmux::{SendOutcome, TmuxClient, TmuxError};

/// Lines captured per window for status reports.
const STATUS_CAPTURE_LINES: usize = 50;
/// Settle time between sending a command and capturing its effect.
const EXECUTE_SETTLE: Duration = Duration::from_millis(500);

/// Wires the terminal adapter, registry, classifier and assistant bridge
/// together. One instance is shared behind a mutex by the monitoring loop
/// and the command surface, which also serializes registry writes.
pub struct Orchestrator {
    pub tmux: TmuxClient,
    pub registry: RegistryStore,
    pub assistant: AssistantClient,
    pub config: MonitorConfig,
    /// Most recent snapshot analysis from the monitoring loop.
    pub last_analysis: Option<MonitoringAnalysis>,
}

/// One round of assistant-backed snapshot analysis, kept for the command
/// surface and for diffing against the next round.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringAnalysis {
    pub timestamp: DateTime<Utc>,
    pub snapshot: String,
    pub analysis: String,
    pub has_previous: bool,
}

#[derive(Debug, Serialize)]
pub struct FullStatus {
    pub timestamp: DateTime<Utc>,
    pub sessions: BTreeMap<String, SessionStatus>,
    pub registry_summary: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub name: String,
    pub attached: bool,
    pub windows: BTreeMap<String, WindowStatus>,
    pub registry_info: Option<SessionEntry>,
}

#[derive(Debug, Serialize)]
pub struct WindowStatus {
    pub index: u32,
    pub name: String,
    pub active: bool,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub registry_info: Option<WindowEntry>,
}

#[derive(Debug, Serialize)]
pub struct WindowAnalysis {
    pub session: String,
    pub window: u32,
    pub window_name: String,
    pub content: String,
    pub lines_captured: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of a safety-gated relay. `outcome` is `None` when the safety
/// check blocked transmission.
#[derive(Debug)]
pub struct RelayReport {
    pub suggestion: CommandSuggestion,
    pub outcome: Option<SendOutcome>,
}

impl Orchestrator {
    pub fn new(
        tmux: TmuxClient,
        registry: RegistryStore,
        assistant: AssistantClient,
        config: MonitorConfig,
    ) -> Self {
        Self {
            tmux,
            registry,
            assistant,
            config,
            last_analysis: None,
        }
    }

    /// Analyze the current snapshot against the previous one and remember
    /// the result. No-op when the assistant is unavailable.
    pub async fn refresh_analysis(&mut self) {
        if !self.assistant.is_available() {
            return;
        }

        let snapshot = self.tmux.monitoring_snapshot().await;
        let previous = self.last_analysis.as_ref().map(|a| a.snapshot.clone());
        let analysis = self
            .assistant
            .compare_snapshots(previous.as_deref(), &snapshot)
            .await;

        self.last_analysis = Some(MonitoringAnalysis {
            timestamp: Utc::now(),
            snapshot,
            analysis,
            has_previous: previous.is_some(),
        });
    }

    /// Comprehensive status of every live session, joined with registry
    /// metadata and a verdict per window.
    pub async fn full_status(&self, include_content: bool, lines_per_window: usize) -> FullStatus {
        let mut sessions = BTreeMap::new();

        for session in self.tmux.list_sessions().await {
            let mut windows = BTreeMap::new();
            for window in &session.windows {
                let content = self
                    .tmux
                    .capture_window(&session.name, window.index, lines_per_window)
                    .await;
                let verdict = health::classify(&content, &self.config);
                windows.insert(
                    window.index.to_string(),
                    WindowStatus {
                        index: window.index,
                        name: window.name.clone(),
                        active: window.active,
                        verdict,
                        content: include_content.then_some(content),
                        registry_info: self
                            .registry
                            .get_window(&session.name, window.index)
                            .cloned(),
                    },
                );
            }

            sessions.insert(
                session.name.clone(),
                SessionStatus {
                    name: session.name.clone(),
                    attached: session.attached,
                    windows,
                    registry_info: self.registry.get_session(&session.name).cloned(),
                },
            );
        }

        FullStatus {
            timestamp: Utc::now(),
            sessions,
            registry_summary: self.registry.summary(),
        }
    }

    /// Short text summary of live sessions, annotated from the registry.
    pub async fn quick_summary(&self) -> String {
        let sessions = self.tmux.list_sessions().await;

        let mut lines = vec![
            format!("=== Tmux Status at {} ===", Local::now().format("%H:%M:%S")),
            format!("Active Sessions: {}", sessions.len()),
        ];

        for session in &sessions {
            let attached = if session.attached { "●" } else { "○" };
            lines.push(String::new());
            lines.push(format!(
                "{} {} ({} windows)",
                attached,
                session.name,
                session.windows.len()
            ));

            for window in &session.windows {
                let active = if window.active { "→" } else { " " };
                lines.push(format!("  {} {}: {}", active, window.index, window.name));

                if let Some(info) = self.registry.get_window(&session.name, window.index) {
                    if !info.purpose.is_empty() {
                        lines.push(format!("     Purpose: {}", info.purpose));
                    }
                    if let Some(latest) = info.monitoring_notes.last() {
                        let note: String = latest.note.chars().take(60).collect();
                        lines.push(format!("     Latest: {}...", note));
                    }
                }
            }
        }

        lines.join("\n")
    }

    /// Deep capture of one window for analysis.
    pub async fn analyze_window(&self, session: &str, window: u32, lines: usize) -> WindowAnalysis {
        let content = self.tmux.capture_window(session, window, lines).await;
        let window_name = match self.tmux.window_info(session, window).await {
            Ok(info) => info.name,
            Err(_) => "unknown".to_string(),
        };

        WindowAnalysis {
            session: session.to_string(),
            window,
            window_name,
            content,
            lines_captured: lines,
            timestamp: Utc::now(),
        }
    }

    /// Send a command without the interactive gate and report the window
    /// content before and shortly after.
    pub async fn execute_command(&self, session: &str, window: u32, command: &str) -> ExecutionReport {
        let before = self
            .tmux
            .capture_window(session, window, STATUS_CAPTURE_LINES)
            .await;

        let outcome = self.tmux.send_command(session, window, command, false).await;
        if !outcome.is_delivered() {
            return ExecutionReport {
                success: false,
                command: command.to_string(),
                before: None,
                after: None,
                error: Some(match outcome {
                    SendOutcome::SubmitFailed => {
                        "Command typed but submit keystroke failed".to_string()
                    }
                    _ => "Failed to send command".to_string(),
                }),
                timestamp: Utc::now(),
            };
        }

        tokio::time::sleep(EXECUTE_SETTLE).await;
        let after = self
            .tmux
            .capture_window(session, window, STATUS_CAPTURE_LINES)
            .await;

        ExecutionReport {
            success: true,
            command: command.to_string(),
            before: Some(before),
            after: Some(after),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Apply a JSON update document to the registry:
    /// `{ "<session>": { "session_info": {...}, "windows": { "<idx>": {...} } } }`.
    pub fn update_from_json(&mut self, updates: &Value) -> String {
        let Some(map) = updates.as_object() else {
            return "Error: update document must be a JSON object".to_string();
        };

        let mut results = Vec::new();
        for (session_name, session_updates) in map {
            if let Some(info) = session_updates.get("session_info") {
                let applied = serde_json::from_value::<SessionFields>(info.clone())
                    .map(|fields| self.registry.upsert_session(session_name, fields).is_ok())
                    .unwrap_or(false);
                results.push(format!(
                    "Session {}: {}",
                    session_name,
                    if applied { "updated" } else { "failed" }
                ));
            }

            if let Some(windows) = session_updates.get("windows").and_then(|w| w.as_object()) {
                for (index, window_updates) in windows {
                    let applied = index
                        .parse::<u32>()
                        .ok()
                        .zip(serde_json::from_value::<WindowFields>(window_updates.clone()).ok())
                        .map(|(index, fields)| {
                            self.registry.upsert_window(session_name, index, fields).is_ok()
                        })
                        .unwrap_or(false);
                    results.push(format!(
                        "Window {}:{}: {}",
                        session_name,
                        index,
                        if applied { "updated" } else { "failed" }
                    ));
                }
            }
        }

        if results.is_empty() {
            "No updates applied".to_string()
        } else {
            results.join("\n")
        }
    }

    /// Attach an analysis note to a window's bounded note list.
    pub fn add_note(&mut self, session: &str, window: u32, note: &str) -> bool {
        self.registry.append_note(session, window, note).unwrap_or(false)
    }

    /// Assistant analysis of one window, degraded when the window is gone
    /// or the assistant is unavailable.
    pub async fn assistant_window_analysis(
        &self,
        session: &str,
        window: u32,
        user_query: &str,
    ) -> String {
        let info = match self.tmux.window_info(session, window).await {
            Ok(info) => info,
            Err(TmuxError::WindowNotFound { target }) => {
                return format!("Could not get window info: {} not found", target);
            }
            Err(e) => return format!("Could not get window info: {}", e),
        };

        if !self.assistant.is_available() {
            return format!("Claude not available. Window shows: {}", info.name);
        }

        let content = self.tmux.capture_window(session, window, 100).await;
        let prompt_text = crate::assistant::prompt::window_analysis_prompt(
            session, window, &info.name, &content, user_query,
        );
        match self
            .assistant
            .ask(&prompt_text, crate::assistant::DEFAULT_ASK_TIMEOUT)
            .await
        {
            Ok(reply) => reply,
            Err(e) => e.to_string(),
        }
    }

    /// Relay a command through the assistant's safety check, then through
    /// the interactive confirmation gate. An `Unsafe` verdict blocks
    /// transmission; the caller surfaces the suggested alternative.
    pub async fn relay_command(&self, session: &str, window: u32, command: &str) -> RelayReport {
        let window_name = match self.tmux.window_info(session, window).await {
            Ok(info) => info.name,
            Err(_) => "unknown".to_string(),
        };
        let content = self
            .tmux
            .capture_window(session, window, STATUS_CAPTURE_LINES)
            .await;

        let suggestion = self
            .assistant
            .suggest_command(
                session,
                window,
                &window_name,
                &content,
                &format!("Execute: {}", command),
            )
            .await;

        if suggestion.safety_level == SafetyLevel::Unsafe {
            return RelayReport {
                suggestion,
                outcome: None,
            };
        }

        let outcome = self.tmux.send_command(session, window, command, true).await;
        RelayReport {
            suggestion,
            outcome: Some(outcome),
        }
    }
}
