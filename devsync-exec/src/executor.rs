//! Sequential command execution with modifier semantics.
//!
//! ## Per-entry behaviour
//!
//! | entry            | behaviour                                                        |
//! |------------------|------------------------------------------------------------------|
//! | `Literal`        | run once per cycle; a repeat is skipped silently                 |
//! | `ManualOverride` | confirm each command; declined commands are skipped individually |
//! | `SkipIf`         | skip the whole block per [`SkipIfMode`], else run every command  |
//! | `Parallel`       | start each command detached; never awaited, output not logged    |
//!
//! A failing command is logged and recorded as run; the queue always drains.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use devsync_core::{CommandSpec, SkipIfMode};

use crate::error::ExecError;
use crate::notify::NotificationSink;
use crate::process::ProcessRunner;

/// Commands already run in the current cycle. Literal strings only.
#[derive(Debug, Default, Clone)]
pub struct RunState {
    already_run: HashSet<String>,
}

impl RunState {
    pub fn has_run(&self, command: &str) -> bool {
        self.already_run.contains(command)
    }

    fn record(&mut self, command: &str) {
        self.already_run.insert(command.to_string());
    }

    /// Whether a `skipIf` block guarded by `test_for` should be skipped.
    ///
    /// An empty `test_for` never skips.
    pub fn should_skip(&self, test_for: &BTreeSet<String>, mode: SkipIfMode) -> bool {
        if test_for.is_empty() {
            return false;
        }
        match mode {
            SkipIfMode::Any => test_for.iter().any(|cmd| self.has_run(cmd)),
            SkipIfMode::All => test_for.iter().all(|cmd| self.has_run(cmd)),
        }
    }
}

/// What happened to each command during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Invoked and awaited, in order. Includes failures.
    pub executed: Vec<String>,
    /// Subset of `executed` that failed to spawn or exited non-zero.
    pub failed: Vec<String>,
    /// Repeats, declined prompts and skipped blocks.
    pub skipped: Vec<String>,
    /// Started detached.
    pub detached: Vec<String>,
}

/// Drains a resolved command list for one cycle.
pub struct CommandExecutor<'a> {
    runner: &'a dyn ProcessRunner,
    sink: &'a dyn NotificationSink,
    cwd: PathBuf,
    skip_if_mode: SkipIfMode,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        sink: &'a dyn NotificationSink,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            sink,
            cwd: cwd.into(),
            skip_if_mode: SkipIfMode::default(),
        }
    }

    pub fn with_skip_if_mode(mut self, mode: SkipIfMode) -> Self {
        self.skip_if_mode = mode;
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Run every entry of `commands` in order with a fresh [`RunState`].
    pub fn run(&self, commands: &[CommandSpec]) -> ExecutionReport {
        let mut state = RunState::default();
        let mut report = ExecutionReport::default();
        for spec in commands {
            self.run_entry(spec, &mut state, &mut report);
        }
        tracing::info!(
            executed = report.executed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            detached = report.detached.len(),
            "command queue drained",
        );
        report
    }

    fn run_entry(&self, spec: &CommandSpec, state: &mut RunState, report: &mut ExecutionReport) {
        match spec {
            CommandSpec::Literal(cmd) => {
                if state.has_run(cmd) {
                    tracing::debug!(command = %cmd, "already ran this cycle, skipping");
                    report.skipped.push(cmd.clone());
                    return;
                }
                self.invoke(cmd, state, report);
            }
            CommandSpec::ManualOverride(cmds) => {
                for cmd in cmds {
                    if self.sink.confirm(&format!("Do you want to run '{cmd}'?")) {
                        self.invoke(cmd, state, report);
                    } else {
                        self.sink.info(&format!("Skipped '{cmd}' (not confirmed)"));
                        report.skipped.push(cmd.clone());
                    }
                }
            }
            CommandSpec::SkipIf { test_for, commands } => {
                if state.should_skip(test_for, self.skip_if_mode) {
                    self.sink.info(&format!(
                        "Skipping {} (already ran: {})",
                        commands.join(", "),
                        test_for
                            .iter()
                            .filter(|cmd| state.has_run(cmd))
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                    report.skipped.extend(commands.iter().cloned());
                    return;
                }
                for cmd in commands {
                    self.invoke(cmd, state, report);
                }
            }
            CommandSpec::Parallel(cmds) => {
                for cmd in cmds {
                    self.sink.info(&format!("Starting in background: {cmd}"));
                    match self.runner.run_detached(cmd, &self.cwd) {
                        Ok(()) => report.detached.push(cmd.clone()),
                        Err(err) => {
                            tracing::warn!(command = %cmd, error = %err, "failed to start background command");
                            report.failed.push(cmd.clone());
                        }
                    }
                }
            }
        }
    }

    /// Run one command to completion and record it, whatever the outcome.
    fn invoke(&self, cmd: &str, state: &mut RunState, report: &mut ExecutionReport) {
        self.sink.info(&format!("Running command: {cmd}"));
        let outcome = self.runner.run(cmd, &self.cwd).and_then(|out| {
            self.sink.append_log(&out.stdout);
            if out.stdout_truncated > 0 {
                self.sink
                    .append_log(&format!("[{} more bytes of output dropped]\n", out.stdout_truncated));
            }
            if out.success() {
                Ok(())
            } else {
                if !out.stderr.trim().is_empty() {
                    tracing::warn!(command = cmd, stderr = %out.stderr.trim(), "command stderr");
                }
                Err(ExecError::Failed {
                    command: cmd.to_string(),
                    code: out.exit_code,
                })
            }
        });

        if let Err(err) = outcome {
            tracing::warn!(error = %err, "command failed, continuing with queue");
            report.failed.push(cmd.to_string());
        }
        state.record(cmd);
        report.executed.push(cmd.to_string());
    }
}
