use std::io::{self, Write};
use std::process::Stdio;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

use super::{TmuxSession, TmuxWindow, WindowInfo};

/// Hard cap on captured pane lines, bounding memory and prompt size.
pub const MAX_CAPTURE_LINES: usize = 1000;

/// Errors surfaced by point lookups. Listing and capture never raise past
/// the adapter boundary; they degrade to empty results or marker strings.
#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("window not found: {target}")]
    WindowNotFound { target: String },
    #[error("tmux command failed: {0}")]
    Command(String),
}

/// Outcome of a command send, keeping partial failures visible: a failed
/// submit keystroke after successful text injection leaves the command
/// typed but not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Declined,
    TypeFailed,
    SubmitFailed,
}

impl SendOutcome {
    pub fn is_delivered(self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
    /// When set, key injection with `confirm` blocks on an interactive gate
    safety_mode: bool,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
            safety_mode: true,
        }
    }

    pub fn with_safety_mode(mut self, enabled: bool) -> Self {
        self.safety_mode = enabled;
        self
    }

    /// Check if tmux server is running
    pub async fn is_server_running(&self) -> bool {
        Command::new(&self.tmux_path)
            .arg("list-sessions")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// List all sessions and their windows. A listing failure is logged and
    /// yields an empty collection; it never propagates as an error.
    pub async fn list_sessions(&self) -> Vec<TmuxSession> {
        match self.try_list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("could not list tmux sessions: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn try_list_sessions(&self) -> Result<Vec<TmuxSession>> {
        // Format: session_name|session_attached
        let output = Command::new(&self.tmux_path)
            .args(["list-sessions", "-F", "#{session_name}|#{session_attached}"])
            .output()
            .await
            .context("Failed to execute tmux list-sessions")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("no sessions") {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-sessions failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut sessions = Vec::new();

        for line in stdout.lines() {
            let Some((name, attached)) = parse_session_line(line) else {
                continue;
            };
            let windows = self.list_windows(&name).await?;
            sessions.push(TmuxSession {
                name,
                attached,
                windows,
            });
        }

        Ok(sessions)
    }

    async fn list_windows(&self, session_name: &str) -> Result<Vec<TmuxWindow>> {
        // Format: window_index|window_name|window_active
        let output = Command::new(&self.tmux_path)
            .args([
                "list-windows",
                "-t",
                session_name,
                "-F",
                "#{window_index}|#{window_name}|#{window_active}",
            ])
            .output()
            .await
            .context("Failed to execute tmux list-windows")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux list-windows failed for {}: {}", session_name, stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| parse_window_line(session_name, line))
            .collect())
    }

    /// Capture the most recent lines from a window, clamped to
    /// [`MAX_CAPTURE_LINES`]. A capture failure returns an explicit marker
    /// string so classification always receives a value.
    pub async fn capture_window(&self, session_name: &str, window_index: u32, lines: usize) -> String {
        let lines = effective_lines(lines);
        let target = format!("{}:{}", session_name, window_index);

        let result = Command::new(&self.tmux_path)
            .args(["capture-pane", "-t", &target, "-p", "-S", &format!("-{}", lines)])
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).into_owned()
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                format!("Error capturing window content: {}", stderr.trim())
            }
            Err(e) => format!("Error capturing window content: {}", e),
        }
    }

    /// Point lookup for one window. Fails with [`TmuxError::WindowNotFound`]
    /// when the window no longer exists.
    pub async fn window_info(&self, session_name: &str, window_index: u32) -> Result<WindowInfo, TmuxError> {
        let target = format!("{}:{}", session_name, window_index);

        let output = Command::new(&self.tmux_path)
            .args([
                "display-message",
                "-t",
                &target,
                "-p",
                "#{window_name}|#{window_active}|#{window_panes}|#{window_layout}",
            ])
            .output()
            .await
            .map_err(|e| TmuxError::Command(e.to_string()))?;

        if !output.status.success() {
            return Err(TmuxError::WindowNotFound { target });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_window_info(stdout.trim())
            .ok_or(TmuxError::WindowNotFound { target })
    }

    /// Send literal keystrokes to a window, optionally behind the
    /// interactive safety gate. Returns `false` on decline or transmission
    /// error, never an `Err`.
    pub async fn send_keys(&self, session_name: &str, window_index: u32, keys: &str, confirm: bool) -> bool {
        if !self.confirm_send(session_name, window_index, keys, confirm) {
            return false;
        }
        self.inject_keys(session_name, window_index, keys).await
    }

    /// Send a command: the literal text followed by an unconditional submit
    /// keystroke (`C-m`). Both steps must succeed for delivery.
    pub async fn send_command(
        &self,
        session_name: &str,
        window_index: u32,
        command: &str,
        confirm: bool,
    ) -> SendOutcome {
        if !self.confirm_send(session_name, window_index, command, confirm) {
            return SendOutcome::Declined;
        }
        if !self.send_keys(session_name, window_index, command, false).await {
            return SendOutcome::TypeFailed;
        }
        if !self.inject_keys(session_name, window_index, "C-m").await {
            // Text was typed but never submitted; callers must treat this
            // as a failure even though the first step succeeded.
            return SendOutcome::SubmitFailed;
        }
        SendOutcome::Delivered
    }

    fn confirm_send(&self, session_name: &str, window_index: u32, keys: &str, confirm: bool) -> bool {
        if !(self.safety_mode && confirm) {
            return true;
        }
        println!(
            "SAFETY CHECK: About to send '{}' to {}:{}",
            keys, session_name, window_index
        );
        print!("Confirm? (yes/no): ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        if answer.trim().eq_ignore_ascii_case("yes") {
            true
        } else {
            println!("Operation cancelled");
            false
        }
    }

    async fn inject_keys(&self, session_name: &str, window_index: u32, keys: &str) -> bool {
        let target = format!("{}:{}", session_name, window_index);
        let result = Command::new(&self.tmux_path)
            .args(["send-keys", "-t", &target, keys])
            .status()
            .await;

        match result {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!("tmux send-keys to {} exited with {}", target, status);
                false
            }
            Err(e) => {
                warn!("tmux send-keys to {} failed: {}", target, e);
                false
            }
        }
    }

    /// Find windows whose name contains the needle, case-insensitively.
    pub async fn find_windows_by_name(&self, needle: &str) -> Vec<(String, u32)> {
        let needle = needle.to_lowercase();
        self.list_sessions()
            .await
            .iter()
            .flat_map(|session| session.windows.iter())
            .filter(|window| window.name.to_lowercase().contains(&needle))
            .map(|window| (window.session_name.clone(), window.index))
            .collect()
    }

    /// Build a formatted snapshot of every session and window, with a short
    /// tail of recent output per window, for assistant consumption.
    pub async fn monitoring_snapshot(&self) -> String {
        let timestamp = chrono::Local::now().to_rfc3339();
        let mut snapshot = format!("Tmux Monitoring Snapshot - {}\n", timestamp);
        snapshot.push_str(&"=".repeat(50));
        snapshot.push_str("\n\n");

        for session in self.list_sessions().await {
            snapshot.push_str(&format!(
                "Session: {} ({})\n",
                session.name,
                if session.attached { "ATTACHED" } else { "DETACHED" }
            ));
            snapshot.push_str(&"-".repeat(30));
            snapshot.push('\n');

            for window in &session.windows {
                snapshot.push_str(&format!("  Window {}: {}", window.index, window.name));
                if window.active {
                    snapshot.push_str(" (ACTIVE)");
                }
                snapshot.push('\n');

                let content = self.capture_window(&session.name, window.index, 50).await;
                let recent: Vec<&str> = content.lines().rev().take(10).collect();
                if !recent.is_empty() {
                    snapshot.push_str("    Recent output:\n");
                    for line in recent.into_iter().rev() {
                        if !line.trim().is_empty() {
                            snapshot.push_str(&format!("    | {}\n", line));
                        }
                    }
                }
                snapshot.push('\n');
            }
        }

        snapshot
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp a requested line count to the hard cap.
pub(crate) fn effective_lines(requested: usize) -> usize {
    requested.min(MAX_CAPTURE_LINES)
}

fn parse_session_line(line: &str) -> Option<(String, bool)> {
    let (name, attached) = line.rsplit_once('|')?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), attached == "1"))
}

fn parse_window_line(session_name: &str, line: &str) -> Option<TmuxWindow> {
    let mut parts = line.splitn(3, '|');
    let index = parts.next()?.parse().ok()?;
    let name = parts.next()?.to_string();
    let active = parts.next()? == "1";
    Some(TmuxWindow {
        session_name: session_name.to_string(),
        index,
        name,
        active,
    })
}

fn parse_window_info(line: &str) -> Option<WindowInfo> {
    // Layout strings never contain '|', so split from both ends around the
    // free-form window name.
    let (name, rest) = line.split_once('|')?;
    let mut parts = rest.splitn(3, '|');
    let active = parts.next()? == "1";
    let panes = parts.next()?.parse().ok()?;
    let layout = parts.next()?.to_string();
    Some(WindowInfo {
        name: name.to_string(),
        active,
        panes,
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_lines_hard_cap() {
        assert_eq!(effective_lines(5000), MAX_CAPTURE_LINES);
        assert_eq!(effective_lines(1001), 1000);
        assert_eq!(effective_lines(1000), 1000);
        assert_eq!(effective_lines(50), 50);
    }

    #[test]
    fn test_parse_session_line() {
        assert_eq!(
            parse_session_line("dev|1"),
            Some(("dev".to_string(), true))
        );
        assert_eq!(
            parse_session_line("background|0"),
            Some(("background".to_string(), false))
        );
        assert_eq!(parse_session_line(""), None);
        assert_eq!(parse_session_line("|1"), None);
    }

    #[test]
    fn test_parse_window_line() {
        let window = parse_window_line("dev", "2|editor|1").unwrap();
        assert_eq!(window.session_name, "dev");
        assert_eq!(window.index, 2);
        assert_eq!(window.name, "editor");
        assert!(window.active);

        assert!(parse_window_line("dev", "not-a-number|x|0").is_none());
        assert!(parse_window_line("dev", "").is_none());
    }

    #[test]
    fn test_parse_window_info() {
        let info = parse_window_info("server|0|2|87x30,0,0{43x30,0,0,1,43x30,44,0,2}").unwrap();
        assert_eq!(info.name, "server");
        assert!(!info.active);
        assert_eq!(info.panes, 2);
        assert!(info.layout.starts_with("87x30"));

        assert!(parse_window_info("").is_none());
        assert!(parse_window_info("name-only").is_none());
    }

    #[test]
    fn test_submit_failure_is_overall_failure() {
        assert!(!SendOutcome::SubmitFailed.is_delivered());
        assert!(!SendOutcome::TypeFailed.is_delivered());
        assert!(!SendOutcome::Declined.is_delivered());
        assert!(SendOutcome::Delivered.is_delivered());
    }
}
