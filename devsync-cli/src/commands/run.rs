//! `devsync run [--yes]`: one sync cycle in the foreground.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use devsync_core::FileConfig;
use devsync_daemon::{init_tracing, run_cycle, CycleContext, CycleOutcome, GitClient};
use devsync_exec::{ConsoleSink, PromptMode, ShellRunner};

use super::Workspace;

/// Run one sync cycle now, in the foreground.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Answer "yes" to every manualOverride prompt.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl RunArgs {
    pub fn run(self, workspace: &Workspace) -> Result<()> {
        init_tracing();
        let (path, config) = workspace.load_config()?;
        let timeout = config.step_timeout();

        let provider = FileConfig::new(path);
        let vcs = GitClient::new(workspace.workdir(), timeout);
        let runner = ShellRunner::new(timeout);
        let sink = ConsoleSink::new(if self.yes {
            PromptMode::AssumeYes
        } else {
            PromptMode::Interactive
        });

        let outcome = run_cycle(CycleContext {
            workdir: workspace.workdir(),
            config: &provider,
            vcs: &vcs,
            runner: &runner,
            sink: &sink,
        });

        match outcome {
            CycleOutcome::UpToDate => println!("{} Already up to date.", "✓".green()),
            CycleOutcome::Unauthorized { author } => println!(
                "{} Pulled a commit by {author}; not authorized to trigger commands.",
                "!".yellow()
            ),
            CycleOutcome::Triggered {
                to,
                changed,
                report,
                ..
            } => {
                println!(
                    "{} Pulled {}: {} files changed, {} commands run, {} skipped, {} started in background",
                    "✓".green(),
                    short(&to),
                    changed.len(),
                    report.executed.len(),
                    report.skipped.len(),
                    report.detached.len()
                );
                for failed in &report.failed {
                    println!("  {} {failed}", "failed:".red());
                }
            }
            CycleOutcome::Failed { reason } => bail!("sync cycle failed: {reason}"),
        }
        Ok(())
    }
}

fn short(rev: &str) -> &str {
    rev.get(..7).unwrap_or(rev)
}
