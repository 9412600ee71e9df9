use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::health::{self, Verdict};
use crate::keeper::Keeper;
use crate::orchestrator::Orchestrator;
use crate::registry::{BoundedJournal, IdleAgentEntry, IterationEntry, SessionFields, WindowFields};
use crate::tmux::TmuxSession;

/// Lines captured per window during a monitoring pass.
const ITERATION_CAPTURE_LINES: usize = 100;

/// Shared, adjustable check interval in seconds.
pub type SharedInterval = Arc<AtomicU64>;

/// The continuous monitoring loop. One cycle is in flight at a time; a slow
/// cycle delays the next one rather than overlapping it. A failure in one
/// monitored target never aborts the rest of the cycle or the loop.
pub struct MonitorLoop {
    orchestrator: Arc<Mutex<Orchestrator>>,
    idle_journal: BoundedJournal<IdleAgentEntry>,
    iteration_journal: BoundedJournal<IterationEntry>,
    keeper: Option<Keeper>,
    interval_secs: SharedInterval,
}

impl MonitorLoop {
    pub fn new(
        orchestrator: Arc<Mutex<Orchestrator>>,
        state_dir: &Path,
        config: &MonitorConfig,
        interval_secs: SharedInterval,
    ) -> Self {
        let keeper = config
            .orchestrator_window
            .as_deref()
            .and_then(|target| match Keeper::from_target(target, state_dir) {
                Some(keeper) => Some(keeper),
                None => {
                    warn!("invalid orchestrator_window target: {}", target);
                    None
                }
            });

        Self {
            orchestrator,
            idle_journal: BoundedJournal::new(state_dir.join("idle_agents.json")),
            iteration_journal: BoundedJournal::new(state_dir.join("orchestrator_log.json")),
            keeper,
            interval_secs,
        }
    }

    /// Run until the shutdown channel fires. Shutdown lands on an iteration
    /// boundary: an in-flight cycle completes, nothing new starts.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "monitoring loop started (interval: {}s)",
            self.interval_secs.load(Ordering::Relaxed)
        );

        // Iteration numbering continues across restarts.
        let mut iteration: u64 = self
            .iteration_journal
            .entries()
            .last()
            .map(|entry| entry.iteration)
            .unwrap_or(0);
        loop {
            if *shutdown.borrow() {
                break;
            }

            iteration += 1;
            self.run_iteration(iteration).await;

            let delay = Duration::from_secs(self.interval_secs.load(Ordering::Relaxed));
            debug!("iteration {} complete, next check in {:?}", iteration, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("monitoring loop stopped after {} iterations", iteration);
    }

    /// One full pass over every session and window. The iteration summary
    /// is journaled even when individual targets failed.
    async fn run_iteration(&mut self, iteration: u64) {
        let mut orchestrator = self.orchestrator.lock().await;

        let sessions = orchestrator.tmux.list_sessions().await;
        let mut sessions_checked = Vec::new();

        for session in &sessions {
            sessions_checked.push(session.name.clone());
            if let Err(e) = self.check_session(&mut orchestrator, iteration, session).await {
                warn!(
                    "iteration {}: session {} check failed: {:#}",
                    iteration, session.name, e
                );
            }
        }

        if let Some(keeper) = &mut self.keeper {
            let state = keeper.check(&orchestrator.tmux).await;
            debug!("iteration {}: keeper state {:?}", iteration, state);
        }

        orchestrator.refresh_analysis().await;

        if let Err(e) = self.iteration_journal.push(IterationEntry {
            iteration,
            timestamp: Utc::now(),
            sessions_checked,
        }) {
            warn!("could not journal iteration {}: {:#}", iteration, e);
        }
    }

    async fn check_session(
        &self,
        orchestrator: &mut Orchestrator,
        iteration: u64,
        session: &TmuxSession,
    ) -> Result<()> {
        orchestrator
            .registry
            .upsert_session(&session.name, SessionFields::default())?;

        for window in &session.windows {
            let content = orchestrator
                .tmux
                .capture_window(&session.name, window.index, ITERATION_CAPTURE_LINES)
                .await;

            if is_server_window(&content, &orchestrator.config) {
                let report = health::scan(&content, &orchestrator.config);
                debug!(
                    "iteration {}: {}:{} ({}) is a server window ({:?}), skipping",
                    iteration,
                    session.name,
                    window.index,
                    window.name,
                    health::server_status(&report)
                );
                continue;
            }

            orchestrator.registry.upsert_window(
                &session.name,
                window.index,
                WindowFields {
                    name: Some(window.name.clone()),
                    ..Default::default()
                },
            )?;

            let report = health::scan(&content, &orchestrator.config);
            match report.verdict() {
                Verdict::Idle => {
                    info!(
                        "iteration {}: {}:{} ({}) appears idle",
                        iteration, session.name, window.index, window.name
                    );
                    self.idle_journal.push(IdleAgentEntry {
                        session: session.name.clone(),
                        window: window.index,
                        timestamp: Utc::now(),
                        iteration,
                    })?;
                }
                Verdict::Erroring => {
                    let first = report
                        .errors
                        .first()
                        .map(String::as_str)
                        .unwrap_or("unknown error");
                    warn!(
                        "iteration {}: {}:{} ({}) erroring: {}",
                        iteration, session.name, window.index, window.name, first
                    );
                    // A repeat of the same error is not re-noted or
                    // re-checkpointed; only a change is.
                    let note = format!("errors detected: {}", first);
                    let already_noted = orchestrator
                        .registry
                        .get_window(&session.name, window.index)
                        .and_then(|entry| entry.monitoring_notes.last())
                        .map(|latest| latest.note == note)
                        .unwrap_or(false);
                    if !already_noted {
                        orchestrator
                            .registry
                            .append_note(&session.name, window.index, &note)?;
                        orchestrator
                            .registry
                            .checkpoint(&session.name, window.index, &content, &note)?;
                    }
                }
                verdict => {
                    debug!(
                        "iteration {}: {}:{} ({}) is {}",
                        iteration, session.name, window.index, window.name, verdict
                    );
                }
            }
        }

        Ok(())
    }
}

/// Long-running server windows are skipped by the check-in loop; nudging
/// them would inject keystrokes into a foreground process.
pub fn is_server_window(content: &str, config: &MonitorConfig) -> bool {
    let lowered = content.to_lowercase();
    config
        .server_keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_window_detection() {
        let config = MonitorConfig::default();
        assert!(is_server_window("$ npm run dev\nready in 420ms", &config));
        assert!(is_server_window("Convex Dev deployment watching", &config));
        assert!(!is_server_window("$ cargo test\nrunning 12 tests", &config));
        assert!(!is_server_window("", &config));
    }
}
