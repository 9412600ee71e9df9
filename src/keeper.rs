use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::tmux::TmuxClient;

/// Repeat summons are suppressed while a lease younger than this exists.
pub const SUMMON_LEASE_TTL: Duration = Duration::from_secs(5 * 60);
/// Busy indicators are only meaningful in the most recent output.
const BUSY_SCAN_CHARS: usize = 200;
/// Pause between summon keystrokes, and the longer wait for the assistant
/// to come up before instructions are delivered.
const SUMMON_KEY_DELAY: Duration = Duration::from_secs(1);
const SUMMON_STARTUP_WAIT: Duration = Duration::from_secs(5);

/// Signs an assistant is running in the window at all.
static RE_PRESENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)(claude code|claude>|\? for shortcuts|^\s*>\s)").unwrap()
});

/// Signs the assistant is mid-task: activity verbs and spinner glyphs.
static RE_BUSY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(thinking|working|analyzing|creating|updating|[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏])").unwrap()
});

/// State of the monitored orchestrator window. The machine is perpetual:
/// there is no terminal state, and absence overrides busy/idle at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperState {
    Absent,
    Starting,
    Busy,
    Idle,
}

/// Expiring summon marker. Expiry is baked into the record and checked on
/// read; bare file existence means nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummonLease {
    pub summoned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SummonLease {
    pub fn issue(now: DateTime<Utc>) -> Self {
        Self {
            summoned_at: now,
            expires_at: now + chrono::Duration::seconds(SUMMON_LEASE_TTL.as_secs() as i64),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

const REMINDER: &str = "Time for orchestrator check-in! Please: \
1) Check all sessions with `tmux-shepherd status detailed`, \
2) Analyze idle agents and assign new tasks if needed, \
3) Record decisions with `tmux-shepherd note <session> <window> <text>`. \
Checks recur automatically; just handle this one.";

/// Watches one orchestrator window for a live assistant: summons one when
/// absent, leaves it alone while busy, nudges it when idle.
pub struct Keeper {
    session: String,
    window: u32,
    lease_path: PathBuf,
    instruction_path: PathBuf,
    state: KeeperState,
}

impl Keeper {
    /// Build from a `session:window` target string.
    pub fn from_target(target: &str, state_dir: &std::path::Path) -> Option<Self> {
        let (session, window) = parse_target(target)?;
        Some(Self {
            session,
            window,
            lease_path: state_dir.join("summon.lease.json"),
            instruction_path: state_dir.join("next_check_instruction.md"),
            state: KeeperState::Absent,
        })
    }

    /// One evaluation of the target window. Iterative by design: a busy
    /// target is simply revisited on the caller's next cycle.
    pub async fn check(&mut self, tmux: &TmuxClient) -> KeeperState {
        let content = tmux.capture_window(&self.session, self.window, 50).await;

        let next = if !is_present(&content) {
            self.handle_absent(tmux).await
        } else {
            // Presence reconfirmed: the summon lease has served its purpose.
            self.clear_lease();
            if is_busy(&content) {
                KeeperState::Busy
            } else {
                self.remind(tmux).await;
                KeeperState::Idle
            }
        };

        if next != self.state {
            info!(
                "keeper {}:{} {:?} -> {:?}",
                self.session, self.window, self.state, next
            );
        }
        self.state = next;
        next
    }

    async fn handle_absent(&mut self, tmux: &TmuxClient) -> KeeperState {
        let now = Utc::now();
        if let Some(lease) = self.load_lease() {
            if lease.is_active(now) {
                info!(
                    "keeper {}:{} absent but summoned at {}, waiting",
                    self.session, self.window, lease.summoned_at
                );
                return KeeperState::Starting;
            }
        }

        self.write_lease(SummonLease::issue(now));
        self.summon(tmux).await;
        KeeperState::Starting
    }

    /// Summon sequence: navigate, clear, launch with continuity, then
    /// deliver the queued instruction file.
    async fn summon(&self, tmux: &TmuxClient) {
        info!("summoning assistant in {}:{}", self.session, self.window);

        let state_dir = self
            .instruction_path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());

        let startup = [
            format!("cd '{}'", state_dir),
            "clear".to_string(),
            "claude --continue".to_string(),
        ];
        for command in &startup {
            if !tmux
                .send_command(&self.session, self.window, command, false)
                .await
                .is_delivered()
            {
                warn!("summon step failed in {}:{}: {}", self.session, self.window, command);
                return;
            }
            tokio::time::sleep(SUMMON_KEY_DELAY).await;
        }

        tokio::time::sleep(SUMMON_STARTUP_WAIT).await;

        if let Err(e) = fs::write(&self.instruction_path, self.instruction_text()) {
            warn!("could not write instruction file: {}", e);
            return;
        }
        let deliver = format!(
            "cat {} && rm {}",
            self.instruction_path.display(),
            self.instruction_path.display()
        );
        if !tmux
            .send_command(&self.session, self.window, &deliver, false)
            .await
            .is_delivered()
        {
            warn!("could not deliver instructions to {}:{}", self.session, self.window);
        }
    }

    async fn remind(&self, tmux: &TmuxClient) {
        info!("keeper {}:{} idle, sending reminder", self.session, self.window);
        if !tmux
            .send_command(&self.session, self.window, REMINDER, false)
            .await
            .is_delivered()
        {
            warn!("reminder did not reach {}:{}", self.session, self.window);
        }
    }

    fn instruction_text(&self) -> String {
        format!(
            "# Orchestrator Check-In - {}\n\n\
             You are the tmux orchestrator. Your job is to:\n\n\
             1. Check all active sessions: `tmux-shepherd status detailed`\n\
             2. Identify idle agents, running processes, and errors needing attention\n\
             3. Assign new tasks to idle agents based on project goals\n\
             4. Inspect specific windows: `tmux-shepherd analyze <session> <window> [lines]`\n\
             5. Record status: `tmux-shepherd update '<json>'` and \
                `tmux-shepherd note <session> <window> <text>`\n\n\
             Remember:\n\
             - Never interact with server windows (npm dev, convex dev)\n\
             - Only assign meaningful tasks that move projects forward\n\
             - Document all decisions in the registry\n\
             - Monitoring checks recur automatically\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )
    }

    fn load_lease(&self) -> Option<SummonLease> {
        let raw = fs::read_to_string(&self.lease_path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(lease) => Some(lease),
            Err(e) => {
                warn!("summon lease unreadable, treating as expired: {}", e);
                None
            }
        }
    }

    fn write_lease(&self, lease: SummonLease) {
        match serde_json::to_string_pretty(&lease) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.lease_path, json) {
                    warn!("could not write summon lease: {}", e);
                }
            }
            Err(e) => warn!("could not serialize summon lease: {}", e),
        }
    }

    fn clear_lease(&self) {
        if self.lease_path.exists() {
            let _ = fs::remove_file(&self.lease_path);
        }
    }
}

/// Parse a `session:window` target.
pub fn parse_target(target: &str) -> Option<(String, u32)> {
    let (session, window) = target.rsplit_once(':')?;
    if session.is_empty() {
        return None;
    }
    Some((session.to_string(), window.trim().parse().ok()?))
}

pub fn is_present(content: &str) -> bool {
    RE_PRESENT.is_match(content)
}

/// Busy check over only the most recent output.
pub fn is_busy(content: &str) -> bool {
    RE_BUSY.is_match(tail_chars(content, BUSY_SCAN_CHARS))
}

fn tail_chars(text: &str, n: usize) -> &str {
    match text.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_presence() {
        assert!(is_present("Welcome to Claude Code v1.0"));
        assert!(is_present("claude> "));
        assert!(is_present("  ? for shortcuts"));
        assert!(is_present("some output\n> "));
        assert!(!is_present("bash-5.2$ ls\nsrc tests"));
    }

    #[test]
    fn test_detect_busy() {
        assert!(is_busy("⠋ Thinking"));
        assert!(is_busy("Working on the migration"));
        assert!(is_busy("analyzing dependencies"));
        assert!(!is_busy("all done\n> "));
    }

    #[test]
    fn test_busy_scan_is_bounded_to_recent_output() {
        let mut content = "Thinking hard about this".to_string();
        content.push_str(&"x".repeat(300));
        // The verb scrolled out of the last 200 characters.
        assert!(!is_busy(&content));

        let recent = format!("{}\n⠙ updating files", "y".repeat(300));
        assert!(is_busy(&recent));
    }

    #[test]
    fn test_tail_chars_respects_char_boundaries() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 5), "ab");
        assert_eq!(tail_chars("⠋⠙⠹⠸", 2), "⠹⠸");
        assert_eq!(tail_chars("", 4), "");
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = SummonLease::issue(now);
        assert!(lease.is_active(now));
        assert!(lease.is_active(now + chrono::Duration::seconds(299)));
        assert!(!lease.is_active(now + chrono::Duration::seconds(301)));
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("tmux-orc:0"), Some(("tmux-orc".to_string(), 0)));
        assert_eq!(parse_target("dev:12"), Some(("dev".to_string(), 12)));
        assert_eq!(parse_target("no-colon"), None);
        assert_eq!(parse_target(":3"), None);
        assert_eq!(parse_target("dev:x"), None);
    }
}
