use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Floor for the monitoring interval, in seconds.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 10;

/// Monitoring configuration, loaded once per process from
/// `monitoring_config.json` and treated as read-only during a loop
/// iteration. The file may be edited externally between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between monitoring iterations.
    pub default_check_interval: u64,
    pub error_detection: ErrorDetection,
    pub success_detection: SuccessDetection,
    pub idle_detection: IdleDetection,
    /// Windows whose recent output matches any of these keywords are
    /// long-running servers and are skipped by the check-in loop.
    pub server_keywords: Vec<String>,
    /// Optional `session:window` target the keeper watches for a live
    /// assistant, e.g. `"tmux-orc:0"`.
    pub orchestrator_window: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorDetection {
    /// Case-insensitive substrings that mark a line as an error.
    pub patterns: Vec<String>,
    /// Case-sensitive substrings that exempt a line from error matching.
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessDetection {
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleDetection {
    pub timeout_minutes: u64,
    /// A window is idle when its final non-blank line ends with one of
    /// these prompt suffixes.
    pub prompt_patterns: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_check_interval: 300,
            error_detection: ErrorDetection::default(),
            success_detection: SuccessDetection::default(),
            idle_detection: IdleDetection::default(),
            server_keywords: vec![
                "convex dev".to_string(),
                "npm run".to_string(),
                "yarn dev".to_string(),
                "next dev".to_string(),
            ],
            orchestrator_window: None,
        }
    }
}

impl Default for ErrorDetection {
    fn default() -> Self {
        Self {
            patterns: vec![
                "ERROR".to_string(),
                "FATAL".to_string(),
                "Exception".to_string(),
                "Failed".to_string(),
                "Error:".to_string(),
            ],
            ignore_patterns: vec![
                "[32m".to_string(),
                "[INFO]".to_string(),
                "npm WARN".to_string(),
            ],
        }
    }
}

impl Default for SuccessDetection {
    fn default() -> Self {
        Self {
            patterns: vec![
                "Server running".to_string(),
                "Compiled successfully".to_string(),
                "Ready on".to_string(),
                "Listening on".to_string(),
            ],
        }
    }
}

impl Default for IdleDetection {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            prompt_patterns: vec![
                ">".to_string(),
                "$".to_string(),
                ">>>".to_string(),
                "In [".to_string(),
                "claude>".to_string(),
            ],
        }
    }
}

impl MonitorConfig {
    /// Load the config, writing defaults on first use. A missing or
    /// unreadable file degrades to defaults and is never fatal.
    pub fn load_or_create(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!("monitoring config unreadable, using defaults: {}", e);
                    Self::default()
                }
            },
            Err(_) => {
                let config = Self::default();
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                match serde_json::to_string_pretty(&config) {
                    Ok(json) => {
                        if let Err(e) = fs::write(path, json) {
                            warn!("could not write default monitoring config: {}", e);
                        }
                    }
                    Err(e) => warn!("could not serialize default config: {}", e),
                }
                config
            }
        }
    }

    /// Clamp a requested interval to the supported floor.
    pub fn clamp_interval(secs: u64) -> u64 {
        secs.max(MIN_CHECK_INTERVAL_SECS)
    }

    pub fn check_interval_secs(&self) -> u64 {
        Self::clamp_interval(self.default_check_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.default_check_interval, 300);
        assert_eq!(config.idle_detection.timeout_minutes, 30);
        assert!(config.error_detection.patterns.contains(&"Error:".to_string()));
        assert!(config
            .error_detection
            .ignore_patterns
            .contains(&"[INFO]".to_string()));
        assert!(config
            .idle_detection
            .prompt_patterns
            .contains(&"claude>".to_string()));
        assert!(config.orchestrator_window.is_none());
    }

    #[test]
    fn test_clamp_interval_floor() {
        assert_eq!(MonitorConfig::clamp_interval(5), MIN_CHECK_INTERVAL_SECS);
        assert_eq!(MonitorConfig::clamp_interval(10), 10);
        assert_eq!(MonitorConfig::clamp_interval(600), 600);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let raw = r#"{ "default_check_interval": 60 }"#;
        let config: MonitorConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.default_check_interval, 60);
        assert!(!config.success_detection.patterns.is_empty());
    }

    #[test]
    fn test_load_writes_defaults_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitoring_config.json");
        let config = MonitorConfig::load_or_create(&path);
        assert_eq!(config.default_check_interval, 300);
        assert!(path.exists());

        // Second load reads the file it just wrote.
        let reloaded = MonitorConfig::load_or_create(&path);
        assert_eq!(reloaded.default_check_interval, 300);
    }

    #[test]
    fn test_corrupt_document_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitoring_config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = MonitorConfig::load_or_create(&path);
        assert_eq!(config.default_check_interval, 300);
    }
}
