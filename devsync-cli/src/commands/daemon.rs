//! `devsync daemon`, `devsync start`, `devsync stop`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use devsync_daemon::paths::socket_path;
use devsync_daemon::protocol::{CMD_SHUTDOWN, CMD_START, CMD_STOP};
use devsync_daemon::{request, request_status, start_blocking, DaemonError, DaemonOptions};
use devsync_exec::PromptMode;

use super::Workspace;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + control socket).
    Start {
        /// Serve the socket but do not poll until `devsync start`.
        #[arg(long)]
        paused: bool,

        /// Answer "yes" to every manualOverride prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Shut the daemon down over its control socket.
    Stop,
    /// Query daemon status over its control socket.
    Status {
        /// Emit raw JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: DaemonCommand, workspace: &Workspace) -> Result<()> {
    match command {
        DaemonCommand::Start { paused, yes } => {
            let config_path = workspace.config_path()?;
            start_blocking(DaemonOptions {
                workdir: workspace.workdir.clone(),
                config_path,
                paused,
                prompt: if yes {
                    PromptMode::AssumeYes
                } else {
                    PromptMode::Interactive
                },
            })
            .context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request(workspace.workdir(), CMD_SHUTDOWN) {
            Ok(_) => println!("daemon shutdown requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status { json } => {
            let status = match request_status(workspace.workdir()) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(workspace.workdir()).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

/// `devsync start` / `devsync stop`: toggle polling in a running daemon.
pub fn set_polling(workspace: &Workspace, on: bool) -> Result<()> {
    let (cmd, key) = if on {
        (CMD_START, "started")
    } else {
        (CMD_STOP, "stopped")
    };
    let data = match request(workspace.workdir(), cmd) {
        Ok(data) => data,
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("daemon is not running; start it with `devsync daemon start`");
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("failed to send `{cmd}` to daemon")),
    };

    let changed = data[key].as_bool().unwrap_or(false);
    match (on, changed) {
        (true, true) => println!("{} polling started", "✓".green()),
        (true, false) => println!("polling was already running"),
        (false, true) => println!("{} polling stopped", "✓".green()),
        (false, false) => println!("polling was not running"),
    }
    Ok(())
}

fn print_status(status: &Value) {
    if !status["running"].as_bool().unwrap_or(false) {
        println!("{} daemon is not running", "●".red());
        return;
    }

    let polling = status["polling"].as_bool().unwrap_or(false);
    let busy = status["busy"].as_bool().unwrap_or(false);
    println!(
        "{} daemon running (pid {}) for {}",
        "●".green(),
        status["pid"],
        status["workdir"].as_str().unwrap_or("?")
    );
    println!(
        "  polling: {}  every {}s{}",
        if polling { "on".green() } else { "paused".yellow() },
        status["interval_secs"],
        if busy { "  (cycle in progress)" } else { "" }
    );
    println!(
        "  cycles:  {}  dropped ticks: {}",
        status["cycles"], status["dropped_ticks"]
    );

    let last = status["last_cycle_at"]
        .as_str()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok());
    match (last, status["last_outcome"]["outcome"].as_str()) {
        (Some(at), Some(outcome)) => {
            println!("  last:    {outcome} {} ago", format_age(Utc::now() - at))
        }
        _ => println!("  last:    no cycle yet"),
    }
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        _ => format!("{}h", secs / 3600),
    }
}
