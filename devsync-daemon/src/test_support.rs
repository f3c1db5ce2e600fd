//! Scripted [`VersionControlClient`] for scheduler and cycle tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::VcsError;
use crate::vcs::VersionControlClient;

pub const OLD_REV: &str = "1111111111111111111111111111111111111111";
pub const NEW_REV: &str = "2222222222222222222222222222222222222222";

/// In-memory repository that is either up to date or one commit behind.
#[derive(Debug)]
pub struct ScriptedVcs {
    behind: bool,
    author: String,
    changed: Vec<String>,
    fail_pull: bool,
    pulled: AtomicBool,
    status_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    gate: Option<Mutex<(Sender<()>, Receiver<()>)>>,
}

/// Test-side handle of a gated pull: observe entry, then release it.
///
/// `Sync`, so one handle can be shared between a blocking task that waits
/// for entry and the test body that releases.
#[derive(Debug)]
pub struct PullGate {
    entered: Mutex<Receiver<()>>,
    release: Mutex<Sender<()>>,
}

impl PullGate {
    /// Block until a pull has started, or `timeout` elapses.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        lock(&self.entered).recv_timeout(timeout).is_ok()
    }

    pub fn release(&self) {
        let _ = lock(&self.release).send(());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScriptedVcs {
    pub fn up_to_date() -> Self {
        Self::new(false, "", &[])
    }

    pub fn behind(author: &str, changed: &[&str]) -> Self {
        Self::new(true, author, changed)
    }

    fn new(behind: bool, author: &str, changed: &[&str]) -> Self {
        Self {
            behind,
            author: author.to_string(),
            changed: changed.iter().map(|s| s.to_string()).collect(),
            fail_pull: false,
            pulled: AtomicBool::new(false),
            status_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    /// Make every pull block until the returned gate releases it.
    pub fn gated(mut self) -> (Self, PullGate) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        self.gate = Some(Mutex::new((entered_tx, release_rx)));
        (
            self,
            PullGate {
                entered: Mutex::new(entered_rx),
                release: Mutex::new(release_tx),
            },
        )
    }

    pub fn pulls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn status_checks(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl VersionControlClient for ScriptedVcs {
    fn current_revision(&self) -> Result<String, VcsError> {
        let rev = if self.pulled.load(Ordering::SeqCst) {
            NEW_REV
        } else {
            OLD_REV
        };
        Ok(rev.to_string())
    }

    fn is_behind_remote(&self) -> Result<bool, VcsError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.behind && !self.pulled.load(Ordering::SeqCst))
    }

    fn pull(&self) -> Result<(), VcsError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let gate = lock(gate);
            let _ = gate.0.send(());
            let _ = gate.1.recv_timeout(Duration::from_secs(10));
        }
        if self.fail_pull {
            return Err(VcsError::Failed {
                step: "git pull",
                code: Some(1),
                stderr: "fatal: unable to access remote".to_string(),
            });
        }
        self.pulled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn diff_names(&self, _from: &str, _to: &str) -> Result<Vec<String>, VcsError> {
        Ok(self.changed.clone())
    }

    fn commit_author(&self, _rev: &str) -> Result<String, VcsError> {
        Ok(self.author.clone())
    }
}
