//! Polling daemon: scheduler, git access, sync cycle and control socket.

pub mod cycle;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod vcs;

pub use cycle::{run_cycle, CycleContext, CycleOutcome};
pub use error::{DaemonError, VcsError};
pub use protocol::{request, request_status, send_request, DaemonRequest, DaemonResponse};
pub use runtime::{init_tracing, production_scheduler, serve, start_blocking, DaemonOptions};
pub use scheduler::{CycleDeps, Scheduler, SchedulerStatus, TickResult, TickSource};
pub use vcs::{GitClient, VersionControlClient};
