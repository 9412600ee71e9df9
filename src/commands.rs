use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use crate::config::MonitorConfig;
use crate::keeper::parse_target;
use crate::orchestrator::Orchestrator;
use crate::scheduler::SharedInterval;

pub const USAGE: &str = "\
Usage: tmux-shepherd [command] [args...]
Commands:
  status [detailed]                    - Current status of all sessions
  summary                              - Quick summary
  analyze <session> <window> [lines]   - Deep capture of a specific window
  execute <session> <window> <command> - Execute command in a window
  update <json_updates>                - Update the registry
  note <session> <window> <text>       - Attach a monitoring note
Run without arguments to start continuous monitoring.";

/// Dispatch a one-shot command. Malformed invocations error out and the
/// entry point exits non-zero; this is the only fatal path in the program.
pub async fn run_one_shot(orchestrator: &mut Orchestrator, args: &[String]) -> Result<()> {
    let command = args[0].as_str();
    match command {
        "status" => {
            if args.get(1).map(String::as_str) == Some("detailed") {
                let status = orchestrator.full_status(true, 50).await;
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", orchestrator.quick_summary().await);
            }
        }
        "summary" => {
            println!("{}", orchestrator.quick_summary().await);
        }
        "analyze" => {
            let (session, window) = session_window_args(args, "analyze")?;
            let lines = match args.get(3) {
                Some(raw) => raw.parse().context("lines must be a number")?,
                None => 400,
            };
            let analysis = orchestrator.analyze_window(&session, window, lines).await;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        "execute" => {
            let (session, window) = session_window_args(args, "execute")?;
            if args.len() < 4 {
                bail!("execute requires session, window, and command");
            }
            let command = args[3..].join(" ");
            let report = orchestrator.execute_command(&session, window, &command).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "update" => {
            let raw = args.get(1).context("update requires JSON data")?;
            let updates = serde_json::from_str(raw).context("update payload is not valid JSON")?;
            println!("{}", orchestrator.update_from_json(&updates));
        }
        "note" => {
            let (session, window) = session_window_args(args, "note")?;
            if args.len() < 4 {
                bail!("note requires session, window, and note text");
            }
            let note = args[3..].join(" ");
            if orchestrator.add_note(&session, window, &note) {
                println!("Note added");
            } else {
                println!("Failed to add note");
            }
        }
        _ => bail!("Unknown command: {}\n{}", command, USAGE),
    }
    Ok(())
}

fn session_window_args(args: &[String], command: &str) -> Result<(String, u32)> {
    let session = args
        .get(1)
        .with_context(|| format!("{} requires session and window", command))?;
    let window = args
        .get(2)
        .with_context(|| format!("{} requires session and window", command))?
        .parse()
        .context("window index must be a number")?;
    Ok((session.clone(), window))
}

const REPL_HELP: &str = "\
Commands:
  status                    - Show all sessions and windows
  analyze                   - Assistant analysis of the current snapshot
  window <session>:<index>  - Assistant analysis of a specific window
  send <session>:<index> <command> - Send command to window (with confirmation)
  find <name>               - Find windows by name
  summary                   - Registry summary
  interval <seconds>        - Change monitoring interval
  help                      - Show this help
  quit                      - Exit";

/// Interactive command surface. Runs on its own task and blocks on stdin;
/// the monitoring loop keeps its own cadence. Returns when the user quits
/// or stdin closes.
pub async fn run_repl(orchestrator: Arc<Mutex<Orchestrator>>, interval_secs: SharedInterval) {
    println!();
    println!("{}", "=".repeat(50));
    println!("tmux-shepherd command interface");
    println!("{}", "=".repeat(50));
    println!("{}", REPL_HELP);
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let mut parts = input.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();

        match command {
            "quit" | "exit" => break,
            "help" => println!("{}", REPL_HELP),
            "status" => {
                let orchestrator = orchestrator.lock().await;
                println!("{}", orchestrator.quick_summary().await);
            }
            "summary" => {
                let orchestrator = orchestrator.lock().await;
                println!("{}", orchestrator.registry.summary());
            }
            "analyze" => {
                let orchestrator = orchestrator.lock().await;
                match &orchestrator.last_analysis {
                    Some(round) => {
                        println!(
                            "Assistant Analysis - {}",
                            round.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S")
                        );
                        println!("{}", "-".repeat(40));
                        println!("{}", round.analysis);
                    }
                    None => {
                        let snapshot = orchestrator.tmux.monitoring_snapshot().await;
                        println!(
                            "{}",
                            orchestrator.assistant.analyze_snapshot(&snapshot, None).await
                        );
                    }
                }
            }
            "window" => match rest.first().and_then(|spec| parse_target(spec)) {
                Some((session, window)) => {
                    let orchestrator = orchestrator.lock().await;
                    println!(
                        "{}",
                        orchestrator
                            .assistant_window_analysis(&session, window, "")
                            .await
                    );
                }
                None => println!("Invalid window format. Use session:window (e.g., main:0)"),
            },
            "send" => match rest.split_first() {
                Some((spec, command_parts)) if !command_parts.is_empty() => {
                    match parse_target(spec) {
                        Some((session, window)) => {
                            let command = command_parts.join(" ");
                            let orchestrator = orchestrator.lock().await;
                            let report =
                                orchestrator.relay_command(&session, window, &command).await;

                            println!("Safety Level: {:?}", report.suggestion.safety_level);
                            println!("Reasoning: {}", report.suggestion.reasoning);
                            match report.outcome {
                                None => {
                                    println!("Alternative: {}", report.suggestion.alternative);
                                    println!("Command blocked for safety reasons.");
                                }
                                Some(outcome) if outcome.is_delivered() => {
                                    println!("Command sent to {}:{}", session, window);
                                }
                                Some(_) => println!("Command cancelled or failed"),
                            }
                        }
                        None => {
                            println!("Invalid window format. Use session:window (e.g., main:0)")
                        }
                    }
                }
                _ => println!("send requires a window and a command"),
            },
            "find" => {
                if rest.is_empty() {
                    println!("find requires a window name");
                    continue;
                }
                let needle = rest.join(" ");
                let orchestrator = orchestrator.lock().await;
                let matches = orchestrator.tmux.find_windows_by_name(&needle).await;
                if matches.is_empty() {
                    println!("No windows found matching '{}'", needle);
                } else {
                    println!("Found {} windows matching '{}':", matches.len(), needle);
                    for (session, window) in matches {
                        println!("  {}:{}", session, window);
                    }
                }
            }
            "interval" => match rest.first().and_then(|raw| raw.parse::<u64>().ok()) {
                Some(secs) => {
                    let clamped = MonitorConfig::clamp_interval(secs);
                    if clamped != secs {
                        println!("Minimum interval is {} seconds", clamped);
                    }
                    interval_secs.store(clamped, Ordering::Relaxed);
                    println!("Monitoring interval changed to {} seconds", clamped);
                }
                None => println!("Invalid interval. Must be a number of seconds."),
            },
            _ => {
                println!("Unknown command: {}", input);
                println!("Type 'help' for available commands");
            }
        }
    }
}
