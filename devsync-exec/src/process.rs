//! Child-process execution with a hard timeout.
//!
//! Every external call a cycle makes (git steps and queued commands) goes
//! through [`run_with_timeout`], so a hung process is killed instead of
//! stalling the scheduler forever. The deadline covers the output pipes as
//! well: a command that leaves a background child holding stdout open is
//! cut off at the same deadline as one that never exits.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::error::ExecError;

/// Bytes kept per stream; anything beyond is counted and dropped.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// How long readers get to hit EOF once the process group has been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Bytes dropped from `stdout` past the output limit.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell command lines on behalf of the executor.
pub trait ProcessRunner: Send + Sync {
    /// Run `command` to completion in `cwd` and capture its output.
    fn run(&self, command: &str, cwd: &Path) -> Result<ProcessOutput, ExecError>;

    /// Start `command` in `cwd` and return immediately. The process is never
    /// awaited by the caller and its output is not captured.
    fn run_detached(&self, command: &str, cwd: &Path) -> Result<(), ExecError>;
}

/// [`ProcessRunner`] backed by the platform shell (`sh -c` / `cmd /C`).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
    output_limit: usize,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            output_limit: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }
}

impl ProcessRunner for ShellRunner {
    fn run(&self, command: &str, cwd: &Path) -> Result<ProcessOutput, ExecError> {
        let mut cmd = shell(command);
        cmd.current_dir(cwd);
        run_with_limits(cmd, command, self.timeout, self.output_limit)
    }

    fn run_detached(&self, command: &str, cwd: &Path) -> Result<(), ExecError> {
        let mut cmd = shell(command);
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;
        tracing::debug!(command, pid = child.id(), "detached process started");

        // Reap in the background so the child never lingers as a zombie.
        let label = command.to_string();
        thread::spawn(move || match child.wait() {
            Ok(status) => tracing::debug!(command = %label, code = ?status.code(), "detached process exited"),
            Err(err) => tracing::warn!(command = %label, error = %err, "detached process wait failed"),
        });
        Ok(())
    }
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// [`run_with_limits`] with [`DEFAULT_OUTPUT_LIMIT_BYTES`].
pub fn run_with_timeout(
    cmd: Command,
    label: &str,
    timeout: Duration,
) -> Result<ProcessOutput, ExecError> {
    run_with_limits(cmd, label, timeout, DEFAULT_OUTPUT_LIMIT_BYTES)
}

/// Spawn `cmd` in its own process group, drain stdout/stderr concurrently and
/// give the whole thing at most `timeout`.
///
/// `label` names the command in errors and logs. If the process is still
/// running at the deadline the group is killed and [`ExecError::Timeout`] is
/// returned. If the process exited but something it started still holds the
/// output pipes, the group is killed at the deadline and whatever was read is
/// returned. Each stream keeps at most `output_limit` bytes.
pub fn run_with_limits(
    mut cmd: Command,
    label: &str,
    timeout: Duration,
    output_limit: usize,
) -> Result<ProcessOutput, ExecError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let deadline = Instant::now() + timeout;
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        command: label.to_string(),
        source,
    })?;

    let stdout = spawn_reader(child.stdout.take(), output_limit);
    let stderr = spawn_reader(child.stderr.take(), output_limit);

    let status = match wait(&mut child, label, timeout)? {
        Some(status) => status,
        None => {
            tracing::warn!(
                command = label,
                timeout_secs = timeout.as_secs(),
                "process timed out, killing"
            );
            kill_group(&mut child);
            let _ = child.wait();
            return Err(ExecError::Timeout {
                command: label.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    let (mut out, mut err) = (
        stdout.recv_timeout(remaining).ok(),
        stderr.recv_timeout(remaining).ok(),
    );
    if out.is_none() || err.is_none() {
        tracing::warn!(
            command = label,
            "process exited but its output is still held open, killing its process group"
        );
        kill_group(&mut child);
        out = out.or_else(|| stdout.recv_timeout(DRAIN_GRACE).ok());
        err = err.or_else(|| stderr.recv_timeout(DRAIN_GRACE).ok());
    }

    let (stdout, stdout_truncated) = out.unwrap_or_default();
    let (stderr, stderr_truncated) = err.unwrap_or_default();
    if stdout_truncated > 0 || stderr_truncated > 0 {
        tracing::warn!(command = label, stdout_truncated, stderr_truncated, "output truncated");
    }
    tracing::debug!(command = label, code = ?status.code(), "process finished");
    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: status.code(),
        stdout_truncated,
        stderr_truncated,
    })
}

fn wait(child: &mut Child, label: &str, timeout: Duration) -> Result<Option<ExitStatus>, ExecError> {
    child.wait_timeout(timeout).map_err(|source| ExecError::Io {
        command: label.to_string(),
        source,
    })
}

/// Kill the child and, on unix, every process left in its group.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain syscall on a process group we created.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

type Captured = (Vec<u8>, usize);

fn spawn_reader<R: Read + Send + 'static>(
    reader: Option<R>,
    limit: usize,
) -> mpsc::Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let captured = match reader {
            Some(reader) => read_limited(reader, limit),
            None => (Vec::new(), 0),
        };
        let _ = tx.send(captured);
    });
    rx
}

/// Read to EOF, keeping at most `limit` bytes. Returns the kept bytes and the
/// number dropped.
fn read_limited<R: Read>(mut reader: R, limit: usize) -> Captured {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read process output");
                break;
            }
        };
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }
    (buf, truncated)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner() -> ShellRunner {
        ShellRunner::new(Duration::from_secs(10))
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let dir = TempDir::new().expect("tempdir");
        let out = runner().run("echo hello", dir.path()).expect("run");
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.success());
    }

    #[test]
    fn non_zero_exit_is_reported_not_raised() {
        let dir = TempDir::new().expect("tempdir");
        let out = runner()
            .run("echo oops >&2; exit 3", dir.path())
            .expect("run");
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
    }

    #[test]
    fn runs_in_the_requested_directory() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("marker.txt"), "x").expect("write");
        let out = runner().run("ls", dir.path()).expect("run");
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn hung_process_is_killed_at_timeout() {
        let dir = TempDir::new().expect("tempdir");
        let runner = ShellRunner::new(Duration::from_millis(200));
        let err = runner.run("sleep 5", dir.path()).unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }), "got: {err}");
    }

    #[test]
    fn missing_working_directory_is_a_spawn_error() {
        let dir = TempDir::new().expect("tempdir");
        let gone = dir.path().join("missing");
        let err = runner().run("true", &gone).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }), "got: {err}");
    }

    #[test]
    fn detached_process_returns_immediately() {
        let dir = TempDir::new().expect("tempdir");
        let marker = dir.path().join("done");
        let started = std::time::Instant::now();
        runner()
            .run_detached("sleep 0.3 && touch done", dir.path())
            .expect("detach");
        assert!(started.elapsed() < Duration::from_millis(250));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !marker.exists() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(marker.exists(), "detached command should still complete");
    }

    #[test]
    fn background_child_holding_stdout_does_not_outlive_timeout() {
        let dir = TempDir::new().expect("tempdir");
        let runner = ShellRunner::new(Duration::from_secs(1));
        let started = std::time::Instant::now();
        let out = runner
            .run("sleep 6 & echo started", dir.path())
            .expect("shell itself exits cleanly");
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "run blocked for {:?}",
            started.elapsed()
        );
        assert_eq!(out.stdout.trim(), "started");
        assert!(out.success());
    }

    #[test]
    fn timeout_kills_the_whole_process_group() {
        let dir = TempDir::new().expect("tempdir");
        let runner = ShellRunner::new(Duration::from_millis(300));
        let err = runner
            .run("(sleep 1; touch late) & sleep 5", dir.path())
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }), "got: {err}");

        thread::sleep(Duration::from_millis(1500));
        assert!(
            !dir.path().join("late").exists(),
            "background job should have been killed with its group"
        );
    }

    #[test]
    fn output_beyond_limit_is_counted_and_dropped() {
        let dir = TempDir::new().expect("tempdir");
        let runner = ShellRunner::new(Duration::from_secs(10)).with_output_limit(16);
        let out = runner
            .run("printf '%0100d' 0; printf 'abc' >&2", dir.path())
            .expect("run");
        assert_eq!(out.stdout.len(), 16);
        assert_eq!(out.stdout_truncated, 84);
        assert_eq!(out.stderr, "abc");
        assert_eq!(out.stderr_truncated, 0);
    }

    #[test]
    fn read_limited_keeps_prefix() {
        let (kept, dropped) = read_limited(&b"hello world"[..], 5);
        assert_eq!(kept, b"hello");
        assert_eq!(dropped, 6);
    }
}
