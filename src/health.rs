use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;

/// Window of recent lines scanned for error patterns.
const ERROR_SCAN_LINES: usize = 50;
/// Window of recent lines scanned for success patterns.
const SUCCESS_SCAN_LINES: usize = 20;

/// Health verdict for a window's captured text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No output captured yet
    NotStarted,
    /// Waiting at a prompt
    Idle,
    /// Actively producing output
    Busy,
    /// An error pattern matched recent output
    Erroring,
    /// A success pattern matched recent output
    Succeeded,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Verdict::NotStarted => "not_started",
            Verdict::Idle => "idle",
            Verdict::Busy => "busy",
            Verdict::Erroring => "erroring",
            Verdict::Succeeded => "succeeded",
        };
        f.write_str(label)
    }
}

/// Line-level scan results backing the verdict, kept so callers can report
/// which lines matched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub has_output: bool,
    pub errors: Vec<String>,
    pub successes: Vec<String>,
    pub is_idle: bool,
}

impl HealthReport {
    /// Collapse the scan into a single verdict. Precedence: no output, then
    /// errors, then the idle prompt suffix, then success markers.
    pub fn verdict(&self) -> Verdict {
        if !self.has_output {
            Verdict::NotStarted
        } else if !self.errors.is_empty() {
            Verdict::Erroring
        } else if self.is_idle {
            Verdict::Idle
        } else if !self.successes.is_empty() {
            Verdict::Succeeded
        } else {
            Verdict::Busy
        }
    }
}

/// Interpretation of a server window's scan, where success markers mean
/// "came up" rather than "finished".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    NotStarted,
    Error,
    Running,
    Starting,
}

pub fn server_status(report: &HealthReport) -> ServerStatus {
    if !report.has_output {
        ServerStatus::NotStarted
    } else if !report.errors.is_empty() {
        ServerStatus::Error
    } else if !report.successes.is_empty() {
        ServerStatus::Running
    } else {
        ServerStatus::Starting
    }
}

/// Scan captured text against the configured pattern rules. Total and
/// deterministic; cost is bounded by the scan windows, not pane history.
pub fn scan(text: &str, config: &MonitorConfig) -> HealthReport {
    let mut report = HealthReport {
        has_output: !text.trim().is_empty(),
        ..Default::default()
    };
    if !report.has_output {
        return report;
    }

    let lines: Vec<&str> = text.lines().collect();

    let error_window = lines.len().saturating_sub(ERROR_SCAN_LINES);
    for line in &lines[error_window..] {
        // Ignore patterns are checked first and exempt the whole line.
        if config
            .error_detection
            .ignore_patterns
            .iter()
            .any(|ignore| line.contains(ignore.as_str()))
        {
            continue;
        }
        let lowered = line.to_lowercase();
        if config
            .error_detection
            .patterns
            .iter()
            .any(|pattern| lowered.contains(&pattern.to_lowercase()))
        {
            report.errors.push(line.trim().to_string());
        }
    }

    let success_window = lines.len().saturating_sub(SUCCESS_SCAN_LINES);
    for line in &lines[success_window..] {
        let lowered = line.to_lowercase();
        if config
            .success_detection
            .patterns
            .iter()
            .any(|pattern| lowered.contains(&pattern.to_lowercase()))
        {
            report.successes.push(line.trim().to_string());
        }
    }

    if let Some(last_line) = lines.iter().rev().find(|line| !line.trim().is_empty()) {
        let last_line = last_line.trim_end();
        report.is_idle = config
            .idle_detection
            .prompt_patterns
            .iter()
            .any(|pattern| last_line.ends_with(pattern.as_str()));
    }

    report
}

/// Classify captured text into a verdict.
pub fn classify(text: &str, config: &MonitorConfig) -> Verdict {
    scan(text, config).verdict()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MonitorConfig {
        MonitorConfig::default()
    }

    #[test]
    fn test_empty_text_is_not_started() {
        assert_eq!(classify("", &config()), Verdict::NotStarted);
        assert_eq!(classify("   \n\n  ", &config()), Verdict::NotStarted);
    }

    #[test]
    fn test_error_pattern_detected() {
        let text = "compiling\nError: connection refused\nretrying";
        assert_eq!(classify(text, &config()), Verdict::Erroring);
    }

    #[test]
    fn test_error_matching_is_case_insensitive() {
        let text = "step one\nfatal: repository missing\n";
        assert_eq!(classify(text, &config()), Verdict::Erroring);
    }

    #[test]
    fn test_ignore_pattern_takes_precedence() {
        let text = "[INFO] Error: retrying";
        let verdict = classify(text, &config());
        assert_ne!(verdict, Verdict::Erroring);
    }

    #[test]
    fn test_ignore_only_exempts_its_own_line() {
        let text = "[INFO] Error: retrying\nError: gave up";
        assert_eq!(classify(text, &config()), Verdict::Erroring);
    }

    #[test]
    fn test_error_outside_scan_window_is_ignored() {
        let mut text = String::from("Error: early failure\n");
        for i in 0..60 {
            text.push_str(&format!("line {}\n", i));
        }
        text.push_str("still working");
        assert_eq!(classify(&text, &config()), Verdict::Busy);
    }

    #[test]
    fn test_idle_prompt_suffix() {
        let text = "Previous output\n$ ";
        assert_eq!(classify(text, &config()), Verdict::Idle);

        let text = "done\nclaude>";
        assert_eq!(classify(text, &config()), Verdict::Idle);
    }

    #[test]
    fn test_idle_wins_over_success() {
        let text = "Build succeeded\nCompiled successfully\n$ ";
        assert_eq!(classify(text, &config()), Verdict::Idle);
    }

    #[test]
    fn test_success_without_prompt() {
        let text = "Compiled successfully\nwaiting for changes";
        assert_eq!(classify(text, &config()), Verdict::Succeeded);
    }

    #[test]
    fn test_default_is_busy() {
        let text = "downloading dependencies\nlinking objects";
        assert_eq!(classify(text, &config()), Verdict::Busy);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let text = "Listening on :3000\nError: bind failed\n$ ";
        let first = classify(text, &config());
        for _ in 0..10 {
            assert_eq!(classify(text, &config()), first);
        }
    }

    #[test]
    fn test_scan_reports_matched_lines() {
        let text = "Listening on :3000\nERROR timeout\n";
        let report = scan(text, &config());
        assert_eq!(report.errors, vec!["ERROR timeout"]);
        assert_eq!(report.successes, vec!["Listening on :3000"]);
        assert!(!report.is_idle);
    }

    #[test]
    fn test_server_status_interpretation() {
        let report = scan("Listening on :3000\n", &config());
        assert_eq!(server_status(&report), ServerStatus::Running);

        let report = scan("booting...\n", &config());
        assert_eq!(server_status(&report), ServerStatus::Starting);

        let report = scan("", &config());
        assert_eq!(server_status(&report), ServerStatus::NotStarted);
    }
}
