//! # devsync-exec
//!
//! Runs the command list a sync cycle resolved.
//!
//! [`CommandExecutor`] drains the list in order, applying the modifier
//! semantics of each [`devsync_core::CommandSpec`] variant. Processes are
//! started through a [`ProcessRunner`] and the operator is reached through a
//! [`NotificationSink`]; both are traits so tests can script them.

pub mod error;
pub mod executor;
pub mod notify;
pub mod process;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::ExecError;
pub use executor::{CommandExecutor, ExecutionReport, RunState};
pub use notify::{ConsoleSink, NotificationSink, PromptMode};
pub use process::{run_with_timeout, ProcessOutput, ProcessRunner, ShellRunner};
