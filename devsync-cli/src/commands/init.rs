//! `devsync init [--email <addr>] [--interval <secs>] [--force]`

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use devsync_core::{config, types::DEFAULT_INTERVAL_SECS};
use devsync_exec::run_with_timeout;

use super::Workspace;

/// Write a starter devsync.yaml into the working copy.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Only commits by this author trigger commands. Defaults to
    /// `git config user.email` in the working copy.
    #[arg(long, short = 'e')]
    pub email: Option<String>,

    /// Seconds between polls.
    #[arg(long, short = 'i', default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Overwrite an existing devsync.yaml.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, workspace: &Workspace) -> Result<()> {
        let email = match self.email {
            Some(email) => email,
            None => git_user_email(workspace).context(
                "no --email given and `git config user.email` is unset in this working copy",
            )?,
        };

        let path = config::init_at(workspace.workdir(), &email, self.interval, self.force)
            .with_context(|| format!("failed to init DevSync in {}", workspace.workdir().display()))?;

        println!("{} Wrote {}", "✓".green(), path.display());
        println!("  Authorized author: {email}");
        println!("  Poll interval:     {}s", self.interval);
        println!("  Add rules under `rules:` then run `devsync daemon start`.");
        Ok(())
    }
}

fn git_user_email(workspace: &Workspace) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(["config", "user.email"])
        .current_dir(workspace.workdir());
    let out = run_with_timeout(cmd, "git config user.email", Duration::from_secs(10)).ok()?;
    let email = out.stdout.trim();
    (out.success() && !email.is_empty()).then(|| email.to_string())
}
