use std::path::{Path, PathBuf};
use std::time::Duration;

pub use workshop_core::document::{documents_dir_at as workshops_dir, workshop_root_at as workshop_root};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const DAEMON_CONFIG: &str = "config.yaml";

pub fn socket_path(home: &Path) -> PathBuf {
    workshop_root(home).join(DAEMON_SOCKET)
}

pub fn config_path(home: &Path) -> PathBuf {
    workshop_root(home).join(DAEMON_CONFIG)
}
