use std::path::{Path, PathBuf};

pub const WORKER_SOCKET: &str = "worker.sock";

pub fn teamsync_root(home: &Path) -> PathBuf {
    home.join(".teamsync")
}

pub fn socket_path(home: &Path) -> PathBuf {
    teamsync_root(home).join(WORKER_SOCKET)
}
