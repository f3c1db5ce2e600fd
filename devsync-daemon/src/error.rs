use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the scheduler runtime and the control socket.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] devsync_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

/// Failure of a version-control step. Aborts the current cycle only.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("`{step}` failed: {source}")]
    Exec {
        step: &'static str,
        #[source]
        source: devsync_exec::ExecError,
    },

    #[error("`{step}` exited with {code:?}: {stderr}")]
    Failed {
        step: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{step}` returned unexpected output: {output:?}")]
    Unexpected { step: &'static str, output: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
