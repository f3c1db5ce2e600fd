//! Deterministic stand-ins for [`ProcessRunner`] and [`NotificationSink`],
//! shared by this crate's tests and by the daemon's cycle tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use crate::error::ExecError;
use crate::notify::NotificationSink;
use crate::process::{ProcessOutput, ProcessRunner};

/// Records every command instead of running it.
///
/// Commands succeed with empty output unless scripted otherwise.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    failing: HashSet<String>,
    spawn_errors: HashSet<String>,
    stdout: HashMap<String, String>,
    invocations: Mutex<Vec<String>>,
    detached: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// `command` exits with status 1.
    pub fn fail(mut self, command: &str) -> Self {
        self.failing.insert(command.to_string());
        self
    }

    /// `command` cannot be spawned at all.
    pub fn spawn_error(mut self, command: &str) -> Self {
        self.spawn_errors.insert(command.to_string());
        self
    }

    pub fn stdout(mut self, command: &str, text: &str) -> Self {
        self.stdout.insert(command.to_string(), text.to_string());
        self
    }

    /// Awaited commands, in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        lock(&self.invocations).clone()
    }

    /// Detached commands, in start order.
    pub fn detached(&self) -> Vec<String> {
        lock(&self.detached).clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, command: &str, _cwd: &Path) -> Result<ProcessOutput, ExecError> {
        lock(&self.invocations).push(command.to_string());
        if self.spawn_errors.contains(command) {
            return Err(ExecError::Spawn {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }
        Ok(ProcessOutput {
            stdout: self.stdout.get(command).cloned().unwrap_or_default(),
            stderr: String::new(),
            exit_code: Some(if self.failing.contains(command) { 1 } else { 0 }),
            ..ProcessOutput::default()
        })
    }

    fn run_detached(&self, command: &str, _cwd: &Path) -> Result<(), ExecError> {
        if self.spawn_errors.contains(command) {
            return Err(ExecError::Spawn {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }
        lock(&self.detached).push(command.to_string());
        Ok(())
    }
}

/// Captures notifications and answers prompts from a script.
///
/// Once the scripted answers run out every prompt is declined.
#[derive(Debug, Default)]
pub struct RecordingSink {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
    infos: Mutex<Vec<String>>,
    log: Mutex<String>,
}

impl RecordingSink {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn infos(&self) -> Vec<String> {
        lock(&self.infos).clone()
    }

    pub fn log(&self) -> String {
        lock(&self.log).clone()
    }
}

impl NotificationSink for RecordingSink {
    fn info(&self, message: &str) {
        lock(&self.infos).push(message.to_string());
    }

    fn confirm(&self, message: &str) -> bool {
        lock(&self.prompts).push(message.to_string());
        lock(&self.answers).pop_front().unwrap_or(false)
    }

    fn append_log(&self, text: &str) {
        lock(&self.log).push_str(text);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
