mod client;

pub use client::{SendOutcome, TmuxClient, TmuxError, MAX_CAPTURE_LINES};

use serde::{Deserialize, Serialize};

/// Represents a tmux session and its windows as observed at listing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmuxSession {
    /// Session name (unique, assigned by tmux)
    pub name: String,
    /// Whether a client is attached
    pub attached: bool,
    /// Windows in index order
    pub windows: Vec<TmuxWindow>,
}

/// A single window within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmuxWindow {
    pub session_name: String,
    pub index: u32,
    pub name: String,
    pub active: bool,
}

/// Point-lookup details for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub name: String,
    pub active: bool,
    pub panes: u32,
    pub layout: String,
}
