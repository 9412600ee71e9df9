pub mod prompt;

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

/// Hard bound on a single assistant invocation.
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Tagged failures at the bridge boundary. Callers render these as degraded
/// responses; they never abort the loop.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Claude CLI not available")]
    Unavailable,
    #[error("Claude analysis timed out after {0}s")]
    Timeout(u64),
    #[error("Claude analysis failed: {0}")]
    Failed(String),
}

/// Safety classification carried in a structured reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Caution,
    Unsafe,
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for SafetyLevel {
    /// Unrecognized levels collapse to `Unknown` instead of failing the
    /// whole reply parse.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "safe" => SafetyLevel::Safe,
            "caution" => SafetyLevel::Caution,
            "unsafe" => SafetyLevel::Unsafe,
            _ => SafetyLevel::Unknown,
        })
    }
}

/// A structured command suggestion. Callers relaying `command` to a window
/// must refuse when `safety_level` is [`SafetyLevel::Unsafe`] and surface
/// `alternative` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSuggestion {
    pub command: String,
    pub reasoning: String,
    pub safety_level: SafetyLevel,
    pub alternative: String,
}

impl Default for CommandSuggestion {
    fn default() -> Self {
        Self {
            command: String::new(),
            reasoning: String::new(),
            safety_level: SafetyLevel::Unknown,
            alternative: String::new(),
        }
    }
}

impl CommandSuggestion {
    /// Sentinel for a reply that was not the expected JSON shape. The raw
    /// text is kept in `reasoning`, never discarded.
    fn parse_error(raw: &str) -> Self {
        Self {
            command: "PARSE_ERROR".to_string(),
            reasoning: raw.to_string(),
            safety_level: SafetyLevel::Unknown,
            alternative: "Review response manually".to_string(),
        }
    }

    fn unavailable() -> Self {
        Self {
            command: "UNAVAILABLE".to_string(),
            reasoning: "Claude CLI not available".to_string(),
            safety_level: SafetyLevel::Unknown,
            alternative: "Use manual tmux commands".to_string(),
        }
    }

    fn transport_error(error: &AssistantError) -> Self {
        Self {
            command: "ERROR".to_string(),
            reasoning: format!("Claude error: {}", error),
            safety_level: SafetyLevel::Unknown,
            alternative: "Use manual approach".to_string(),
        }
    }
}

/// Parse a reply into a [`CommandSuggestion`], degrading to the sentinel on
/// any shape mismatch. Total; never fails.
pub fn parse_suggestion(raw: &str) -> CommandSuggestion {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| CommandSuggestion::parse_error(trimmed))
}

/// Bridge to the external assistant, invoked as a subprocess with the
/// prompt handed over in a transient file.
pub struct AssistantClient {
    binary: String,
    available: bool,
}

impl AssistantClient {
    /// Probe for the assistant binary. Unavailability is a warning, not an
    /// error; every call then degrades to a tagged failure.
    pub async fn detect() -> Self {
        let binary = "claude".to_string();
        let available = Command::new(&binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        if !available {
            warn!("Claude CLI not found. Assistant features will be limited.");
        }

        Self { binary, available }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Send a prompt and return the reply. The transient prompt file is
    /// removed on every exit path (drop), including timeout.
    pub async fn ask(&self, prompt_text: &str, timeout: Duration) -> Result<String, AssistantError> {
        if !self.available {
            return Err(AssistantError::Unavailable);
        }

        let mut prompt_file = tempfile::NamedTempFile::new()
            .map_err(|e| AssistantError::Failed(format!("prompt file: {}", e)))?;
        prompt_file
            .write_all(prompt_text.as_bytes())
            .map_err(|e| AssistantError::Failed(format!("prompt file: {}", e)))?;

        let mut invocation = Command::new(&self.binary);
        invocation
            .arg("--file")
            .arg(prompt_file.path())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, invocation.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssistantError::Unavailable);
            }
            Ok(Err(e)) => return Err(AssistantError::Failed(e.to_string())),
            Err(_) => return Err(AssistantError::Timeout(timeout.as_secs())),
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(AssistantError::Failed(stderr))
        }
    }

    /// Whole-snapshot analysis, degraded to a descriptive string when the
    /// assistant is unreachable.
    pub async fn analyze_snapshot(&self, snapshot: &str, user_query: Option<&str>) -> String {
        let prompt_text = prompt::analysis_prompt(snapshot, user_query);
        match self.ask(&prompt_text, DEFAULT_ASK_TIMEOUT).await {
            Ok(reply) => reply,
            Err(e) => e.to_string(),
        }
    }

    /// Compare the previous snapshot against the current one, or analyze
    /// the current one alone on the first pass.
    pub async fn compare_snapshots(&self, previous: Option<&str>, current: &str) -> String {
        let prompt_text = match previous {
            Some(previous) => prompt::comparison_prompt(previous, current),
            None => prompt::analysis_prompt(current, None),
        };
        match self.ask(&prompt_text, DEFAULT_ASK_TIMEOUT).await {
            Ok(reply) => reply,
            Err(e) => e.to_string(),
        }
    }

    /// Ask for a command suggestion toward a goal in one window. Always
    /// returns a suggestion; transport and parse failures degrade to
    /// sentinels with `safety_level == Unknown`.
    pub async fn suggest_command(
        &self,
        session: &str,
        window: u32,
        window_name: &str,
        content: &str,
        goal: &str,
    ) -> CommandSuggestion {
        if !self.available {
            return CommandSuggestion::unavailable();
        }

        let prompt_text =
            prompt::suggest_command_prompt(session, window, window_name, content, goal);
        match self.ask(&prompt_text, DEFAULT_ASK_TIMEOUT).await {
            Ok(reply) => parse_suggestion(&reply),
            Err(e) => CommandSuggestion::transport_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suggestion_not_json_degrades() {
        let suggestion = parse_suggestion("not json");
        assert_eq!(suggestion.safety_level, SafetyLevel::Unknown);
        assert_eq!(suggestion.reasoning, "not json");
        assert_eq!(suggestion.command, "PARSE_ERROR");
    }

    #[test]
    fn test_parse_suggestion_valid_json() {
        let raw = r#"{
            "command": "git status",
            "reasoning": "read-only and safe",
            "safety_level": "safe",
            "alternative": ""
        }"#;
        let suggestion = parse_suggestion(raw);
        assert_eq!(suggestion.command, "git status");
        assert_eq!(suggestion.safety_level, SafetyLevel::Safe);
    }

    #[test]
    fn test_parse_suggestion_unrecognized_safety_level() {
        let raw = r#"{"command": "ls", "reasoning": "", "safety_level": "mostly-fine", "alternative": ""}"#;
        let suggestion = parse_suggestion(raw);
        assert_eq!(suggestion.safety_level, SafetyLevel::Unknown);
        assert_eq!(suggestion.command, "ls");
    }

    #[test]
    fn test_parse_suggestion_missing_fields_default() {
        let suggestion = parse_suggestion(r#"{"command": "uptime"}"#);
        assert_eq!(suggestion.command, "uptime");
        assert_eq!(suggestion.safety_level, SafetyLevel::Unknown);
        assert!(suggestion.alternative.is_empty());
    }

    #[test]
    fn test_safety_level_round_trip() {
        let json = serde_json::to_string(&SafetyLevel::Unsafe).unwrap();
        assert_eq!(json, "\"unsafe\"");
        let parsed: SafetyLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SafetyLevel::Unsafe);
    }

    #[tokio::test]
    async fn test_unavailable_client_returns_tagged_error() {
        let client = AssistantClient {
            binary: "claude".to_string(),
            available: false,
        };
        let result = client.ask("hello", DEFAULT_ASK_TIMEOUT).await;
        assert!(matches!(result, Err(AssistantError::Unavailable)));

        let suggestion = client.suggest_command("dev", 0, "shell", "$ ", "noop").await;
        assert_eq!(suggestion.command, "UNAVAILABLE");
        assert_eq!(suggestion.safety_level, SafetyLevel::Unknown);
    }
}
