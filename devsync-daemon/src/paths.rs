use std::path::{Path, PathBuf};

pub const RUNTIME_DIR: &str = ".devsync";
pub const DAEMON_SOCKET: &str = "daemon.sock";

/// Per-working-copy runtime directory (`<workdir>/.devsync`).
pub fn runtime_dir(workdir: &Path) -> PathBuf {
    workdir.join(RUNTIME_DIR)
}

pub fn socket_path(workdir: &Path) -> PathBuf {
    runtime_dir(workdir).join(DAEMON_SOCKET)
}
