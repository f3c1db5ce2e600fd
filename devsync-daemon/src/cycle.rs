//! One poll-to-execute pass.
//!
//! [`run_cycle`] is blocking and self-contained: it reads the config, talks
//! to version control, resolves rules and drains the command queue. It never
//! panics on external failure; every error path degrades to
//! [`CycleOutcome::Failed`] with no commands run.

use std::path::Path;

use serde::Serialize;

use devsync_core::{resolve, ConfigProvider};
use devsync_exec::{CommandExecutor, ExecutionReport, NotificationSink, ProcessRunner};

use crate::vcs::VersionControlClient;

/// Collaborators of a cycle, borrowed for its duration.
#[derive(Clone, Copy)]
pub struct CycleContext<'a> {
    pub workdir: &'a Path,
    pub config: &'a dyn ConfigProvider,
    pub vcs: &'a dyn VersionControlClient,
    pub runner: &'a dyn ProcessRunner,
    pub sink: &'a dyn NotificationSink,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Local branch already matches the remote.
    UpToDate,
    /// Pulled, but the new tip was authored by someone else.
    Unauthorized { author: String },
    /// Pulled an authorized commit and ran whatever its changes triggered.
    Triggered {
        from: String,
        to: String,
        changed: Vec<String>,
        report: ExecutionReport,
    },
    /// A config or version-control step failed; nothing was run.
    Failed { reason: String },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::UpToDate => "up_to_date",
            CycleOutcome::Unauthorized { .. } => "unauthorized",
            CycleOutcome::Triggered { .. } => "triggered",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}

pub fn run_cycle(ctx: CycleContext<'_>) -> CycleOutcome {
    match try_cycle(ctx) {
        Ok(outcome) => outcome,
        Err(reason) => {
            tracing::warn!(%reason, "cycle aborted");
            CycleOutcome::Failed { reason }
        }
    }
}

fn try_cycle(ctx: CycleContext<'_>) -> Result<CycleOutcome, String> {
    let config = ctx.config.load().map_err(|e| e.to_string())?;
    for (raw, reason) in config.rules.invalid() {
        tracing::warn!(rule = raw, reason, "rule never matches");
    }

    let before = ctx.vcs.current_revision().map_err(|e| e.to_string())?;
    if !ctx.vcs.is_behind_remote().map_err(|e| e.to_string())? {
        tracing::debug!(rev = %before, "up to date with remote");
        return Ok(CycleOutcome::UpToDate);
    }

    ctx.vcs.pull().map_err(|e| e.to_string())?;
    let after = ctx.vcs.current_revision().map_err(|e| e.to_string())?;
    ctx.sink
        .info(&format!("DevSync just pulled the latest changes from: {after}"));

    let author = ctx.vcs.commit_author(&after).map_err(|e| e.to_string())?;
    if author != config.email {
        tracing::info!(%author, authorized = %config.email, "commit author not authorized, skipping");
        return Ok(CycleOutcome::Unauthorized { author });
    }

    let changed = ctx
        .vcs
        .diff_names(&before, &after)
        .map_err(|e| e.to_string())?;
    tracing::info!(files = changed.len(), from = %before, to = %after, "files changed");

    let queue = resolve(&changed, &config.rules, config.match_policy());
    let report = CommandExecutor::new(ctx.runner, ctx.sink, ctx.workdir)
        .with_skip_if_mode(config.skip_if_mode)
        .run(&queue);

    Ok(CycleOutcome::Triggered {
        from: before,
        to: after,
        changed,
        report,
    })
}
