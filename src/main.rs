use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

mod assistant;
mod commands;
mod config;
mod health;
mod keeper;
mod orchestrator;
mod registry;
mod scheduler;
mod tmux;

use assistant::AssistantClient;
use config::MonitorConfig;
use orchestrator::Orchestrator;
use registry::{RegistryStore, DEFAULT_RETENTION_DAYS};
use scheduler::MonitorLoop;
use tmux::TmuxClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if std::env::var_os("TMUX").is_none() {
        warn!("Not running inside tmux. Some features may not work correctly.");
    }

    let state_dir = dirs::home_dir()
        .unwrap_or_default()
        .join(".tmux-shepherd")
        .join("registry");
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

    let config = MonitorConfig::load_or_create(&state_dir.join("monitoring_config.json"));
    let registry = RegistryStore::open(&state_dir)?;
    let assistant = AssistantClient::detect().await;
    let mut orchestrator = Orchestrator::new(TmuxClient::new(), registry, assistant, config.clone());

    // One-shot commands run and exit; malformed invocations exit non-zero.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return commands::run_one_shot(&mut orchestrator, &args).await;
    }

    // Continuous mode: the monitoring loop on its own task, the command
    // surface on this one. Neither blocks the other.
    if !orchestrator.tmux.is_server_running().await {
        warn!("tmux server not running; monitoring will report no sessions");
    }
    match orchestrator.registry.purge_history_older_than(DEFAULT_RETENTION_DAYS) {
        Ok(removed) if removed > 0 => info!("purged {} expired history snapshots", removed),
        Ok(_) => {}
        Err(e) => warn!("history purge failed: {:#}", e),
    }

    let interval_secs = Arc::new(AtomicU64::new(config.check_interval_secs()));
    let orchestrator = Arc::new(Mutex::new(orchestrator));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = MonitorLoop::new(
        Arc::clone(&orchestrator),
        &state_dir,
        &config,
        Arc::clone(&interval_secs),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    info!(
        "starting tmux monitoring (interval: {}s); press Ctrl+C to stop",
        config.check_interval_secs()
    );

    tokio::select! {
        _ = commands::run_repl(Arc::clone(&orchestrator), Arc::clone(&interval_secs)) => {
            info!("command interface closed");
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            info!("interrupt received, shutting down");
        }
    }

    // Stop at an iteration boundary and wait out any in-flight cycle.
    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_handle.await {
        warn!("monitor task did not shut down cleanly: {}", e);
    }
    println!("Monitoring stopped. Goodbye!");

    Ok(())
}
