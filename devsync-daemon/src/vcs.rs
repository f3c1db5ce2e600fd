//! Version-control access for a sync cycle.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use devsync_exec::run_with_timeout;

use crate::error::VcsError;

/// The git operations a cycle needs. Every call is blocking.
pub trait VersionControlClient: Send + Sync {
    /// Commit id of `HEAD`.
    fn current_revision(&self) -> Result<String, VcsError>;

    /// Refresh remote refs, then report whether the local branch is behind.
    fn is_behind_remote(&self) -> Result<bool, VcsError>;

    fn pull(&self) -> Result<(), VcsError>;

    /// Paths changed between two revisions, relative to the repository root.
    fn diff_names(&self, from: &str, to: &str) -> Result<Vec<String>, VcsError>;

    /// Author e-mail of `rev`.
    fn commit_author(&self, rev: &str) -> Result<String, VcsError>;
}

/// [`VersionControlClient`] that shells out to the `git` binary.
#[derive(Debug, Clone)]
pub struct GitClient {
    workdir: PathBuf,
    timeout: Duration,
}

impl GitClient {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn git(&self, step: &'static str, args: &[&str]) -> Result<String, VcsError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            // `is_behind_remote` greps porcelain-less output.
            .env("LC_ALL", "C");

        let out = run_with_timeout(cmd, step, self.timeout)
            .map_err(|source| VcsError::Exec { step, source })?;
        if !out.success() {
            return Err(VcsError::Failed {
                step,
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        tracing::debug!(step, "git step ok");
        Ok(out.stdout)
    }
}

impl VersionControlClient for GitClient {
    fn current_revision(&self) -> Result<String, VcsError> {
        let out = self.git("git rev-parse HEAD", &["rev-parse", "HEAD"])?;
        let rev = out.trim();
        if rev.is_empty() {
            return Err(VcsError::Unexpected {
                step: "git rev-parse HEAD",
                output: out,
            });
        }
        Ok(rev.to_string())
    }

    fn is_behind_remote(&self) -> Result<bool, VcsError> {
        self.git("git remote update", &["remote", "update"])?;
        let status = self.git("git status -uno", &["status", "-uno"])?;
        Ok(reports_behind(&status))
    }

    fn pull(&self) -> Result<(), VcsError> {
        self.git("git pull", &["pull"]).map(|_| ())
    }

    fn diff_names(&self, from: &str, to: &str) -> Result<Vec<String>, VcsError> {
        if from == to {
            return Ok(Vec::new());
        }
        let out = self.git("git diff --name-only", &["diff", "--name-only", from, to])?;
        Ok(split_names(&out))
    }

    fn commit_author(&self, rev: &str) -> Result<String, VcsError> {
        let out = self.git("git show -s --format=%ae", &["show", "-s", "--format=%ae", rev])?;
        Ok(out.trim().to_string())
    }
}

fn reports_behind(status: &str) -> bool {
    status.contains("Your branch is behind")
}

fn split_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behind_detection_reads_status_text() {
        let behind = "On branch main\nYour branch is behind 'origin/main' by 2 commits, and can be fast-forwarded.\n";
        let current = "On branch main\nYour branch is up to date with 'origin/main'.\n";
        assert!(reports_behind(behind));
        assert!(!reports_behind(current));
        assert!(!reports_behind(""));
    }

    #[test]
    fn diff_output_drops_blank_lines() {
        assert_eq!(
            split_names("deploy/x.txt\n\nlib/a.js\n"),
            ["deploy/x.txt", "lib/a.js"]
        );
        assert!(split_names("\n").is_empty());
    }

    #[test]
    fn identical_revisions_have_no_diff() {
        let client = GitClient::new("/nonexistent", Duration::from_secs(1));
        assert!(client.diff_names("abc", "abc").expect("no git call").is_empty());
    }
}
