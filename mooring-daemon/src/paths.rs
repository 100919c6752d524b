//! Runtime locations under `<home>/.mooring`.

use std::path::{Path, PathBuf};

use mooring_core::config::mooring_root;

pub const DAEMON_LOG: &str = "daemon.log";
/// Warnings and errors only, duplicated from the main log.
pub const DAEMON_ERROR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    mooring_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    mooring_root(home).join("logs")
}

pub fn log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}

pub fn error_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_ERROR_LOG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_lives_under_dot_mooring() {
        let home = Path::new("/home/op");
        assert_eq!(socket_path(home), PathBuf::from("/home/op/.mooring/run/daemon.sock"));
        assert_eq!(
            error_log_path(home),
            PathBuf::from("/home/op/.mooring/logs/daemon-err.log")
        );
    }
}
