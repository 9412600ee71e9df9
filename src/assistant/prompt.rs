//! Prompt builders for the assistant subprocess. Plain text in, plain (or
//! JSON-shaped) text out; the transport is in the parent module.

/// System framing for whole-snapshot analysis.
const ANALYSIS_PREAMBLE: &str = "\
You are a tmux session monitoring assistant. Your job is to analyze the \
current state of tmux sessions and provide helpful insights.

Key responsibilities:
1. Summarize what's happening in each window
2. Identify any errors, warnings, or issues
3. Suggest actions if needed
4. Be concise but informative
5. Focus on actionable insights

SAFETY RULES:
- NEVER suggest destructive commands
- NEVER recommend closing windows or sessions
- NEVER suggest commands that could lose data
- Always prioritize safety over convenience

Current tmux state:
";

pub fn analysis_prompt(snapshot: &str, user_query: Option<&str>) -> String {
    let mut prompt = format!("{}{}\n\n", ANALYSIS_PREAMBLE, snapshot);

    if let Some(query) = user_query {
        prompt.push_str(&format!("User's specific question: {}\n\n", query));
    }

    prompt.push_str(
        "Please provide:\n\
         1. Brief overview of what's active\n\
         2. Any issues or concerns you notice\n\
         3. Suggested next steps (if any)\n\
         4. Answer to user's question (if provided)\n\n\
         Keep your response concise and focused.",
    );

    prompt
}

pub fn window_analysis_prompt(
    session: &str,
    window: u32,
    window_name: &str,
    content: &str,
    user_query: &str,
) -> String {
    format!(
        "Analyze this tmux window content and provide insights:\n\n\
         Session: {}\n\
         Window: {} ({})\n\n\
         Content:\n{}\n\n\
         User question: {}\n\n\
         Provide analysis of what's happening and suggest actions if needed. \
         Be concise and safety-focused.",
        session, window, window_name, content, user_query
    )
}

pub fn suggest_command_prompt(
    session: &str,
    window: u32,
    window_name: &str,
    content: &str,
    goal: &str,
) -> String {
    format!(
        "Given this tmux window state, suggest a safe command to achieve the user's goal:\n\n\
         Session: {}\n\
         Window: {} ({})\n\n\
         Current content:\n{}\n\n\
         User's goal: {}\n\n\
         CRITICAL SAFETY REQUIREMENTS:\n\
         - Only suggest safe, non-destructive commands\n\
         - Do not suggest commands that could delete files or kill processes\n\
         - Prefer read-only or status commands when possible\n\
         - If the goal requires destructive actions, suggest safer alternatives\n\n\
         Respond with JSON in this format:\n\
         {{\n\
             \"command\": \"suggested command (or 'UNSAFE' if goal requires destructive action)\",\n\
             \"reasoning\": \"explanation of the command and why it's safe\",\n\
             \"safety_level\": \"safe|caution|unsafe\",\n\
             \"alternative\": \"safer alternative if command is risky\"\n\
         }}",
        session, window, window_name, content, goal
    )
}

pub fn comparison_prompt(previous: &str, current: &str) -> String {
    format!(
        "Compare these two tmux snapshots and identify changes:\n\n\
         PREVIOUS STATE:\n{}\n\n\
         CURRENT STATE:\n{}\n\n\
         Identify:\n\
         1. New activity in any windows\n\
         2. Processes that finished/started\n\
         3. Errors or issues that appeared\n\
         4. Any concerning changes\n\n\
         Be concise and focus on actionable insights.",
        previous, current
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_prompt_includes_query() {
        let prompt = analysis_prompt("Session: dev", Some("is the build done?"));
        assert!(prompt.contains("Session: dev"));
        assert!(prompt.contains("is the build done?"));
        assert!(prompt.contains("SAFETY RULES"));
    }

    #[test]
    fn test_analysis_prompt_without_query() {
        let prompt = analysis_prompt("Session: dev", None);
        assert!(!prompt.contains("User's specific question"));
    }

    #[test]
    fn test_suggest_command_prompt_shape() {
        let prompt = suggest_command_prompt("dev", 1, "shell", "$ ", "check disk usage");
        assert!(prompt.contains("\"safety_level\": \"safe|caution|unsafe\""));
        assert!(prompt.contains("check disk usage"));
        assert!(prompt.contains("Window: 1 (shell)"));
    }
}
