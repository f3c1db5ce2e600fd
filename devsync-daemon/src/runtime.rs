use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use devsync_core::{ConfigProvider, FileConfig};
use devsync_exec::{ConsoleSink, PromptMode, ShellRunner};

use crate::error::{io_err, DaemonError};
use crate::paths::{runtime_dir, socket_path};
use crate::protocol::{
    DaemonRequest, DaemonResponse, CMD_RUN, CMD_SHUTDOWN, CMD_START, CMD_STATUS, CMD_STOP,
};
use crate::scheduler::{CycleDeps, Scheduler, TickResult};
use crate::vcs::GitClient;

/// How to launch a daemon for one working copy.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub workdir: PathBuf,
    pub config_path: PathBuf,
    /// Serve the socket but wait for `start` before polling.
    pub paused: bool,
    pub prompt: PromptMode,
}

/// Build the production scheduler for `opts`: git, a shell runner and the
/// console sink. The config is loaded once here to fail fast; step timeouts
/// are fixed for the daemon's lifetime.
pub fn production_scheduler(opts: &DaemonOptions) -> Result<Scheduler, DaemonError> {
    let provider = FileConfig::new(&opts.config_path);
    let config = provider.load()?;
    for (raw, reason) in config.rules.invalid() {
        tracing::warn!(rule = raw, reason, "rule never matches");
    }

    let timeout = config.step_timeout();
    Ok(Scheduler::new(CycleDeps {
        workdir: opts.workdir.clone(),
        config: Arc::new(provider),
        vcs: Arc::new(GitClient::new(&opts.workdir, timeout)),
        runner: Arc::new(ShellRunner::new(timeout)),
        sink: Arc::new(ConsoleSink::new(opts.prompt)),
    }))
}

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(opts: DaemonOptions) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async move {
        let scheduler = production_scheduler(&opts)?;
        serve(scheduler, opts.workdir, !opts.paused).await
    })
}

/// Run the control socket and (optionally) the polling timer until
/// `shutdown` or ctrl-c.
pub async fn serve(
    scheduler: Scheduler,
    workdir: PathBuf,
    start_polling: bool,
) -> Result<(), DaemonError> {
    let run = runtime_dir(&workdir);
    fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let scheduler = scheduler.clone();
        let workdir = workdir.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(workdir, scheduler, shutdown.clone(), shutdown.subscribe())
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    if start_polling {
        scheduler.start();
    }
    tracing::info!(workdir = %workdir.display(), polling = start_polling, "daemon ready");

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    scheduler.stop().await;

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    workdir: PathBuf,
    scheduler: Scheduler,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&workdir);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let scheduler = scheduler.clone();
                let shutdown_tx = shutdown_tx.clone();
                let workdir = workdir.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, &workdir, scheduler, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    workdir: &Path,
    scheduler: Scheduler,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&request.cmd, workdir, &scheduler, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_SHUTDOWN {
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    cmd: &str,
    workdir: &Path,
    scheduler: &Scheduler,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    match cmd {
        CMD_STATUS => DaemonResponse::ok(build_status_payload(workdir, scheduler)),
        CMD_START => DaemonResponse::ok(json!({ "started": scheduler.start() })),
        CMD_STOP => DaemonResponse::ok(json!({ "stopped": scheduler.stop().await })),
        CMD_RUN => match scheduler.tick().await {
            TickResult::Dropped => DaemonResponse::ok(json!({ "dropped": true })),
            TickResult::Completed(outcome) => DaemonResponse::ok(json!(outcome)),
            TickResult::Panicked => {
                DaemonResponse::error("sync cycle crashed; polling has been stopped")
            }
        },
        CMD_SHUTDOWN => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

fn build_status_payload(workdir: &Path, scheduler: &Scheduler) -> Value {
    let mut payload = json!(scheduler.status());
    payload["running"] = json!(true);
    payload["workdir"] = json!(workdir.display().to_string());
    payload["pid"] = json!(std::process::id());
    payload
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "a daemon is already serving {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`), JSON
/// lines when `DEVSYNC_LOG_FORMAT=json`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("DEVSYNC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
