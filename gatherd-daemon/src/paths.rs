use std::path::{Path, PathBuf};

use gatherd_core::file_store;

pub const DAEMON_SOCKET: &str = "gatherd.sock";
pub const LOCAL_SERVER_DIR: &str = "db";

/// Default executable that manages the local server directory.
pub const DEFAULT_SERVER_BINARY: &str = "connectordb";

pub fn gatherd_root(home: &Path) -> PathBuf {
    file_store::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    gatherd_root(home).join(DAEMON_SOCKET)
}

pub fn local_server_dir(home: &Path) -> PathBuf {
    gatherd_root(home).join(LOCAL_SERVER_DIR)
}
