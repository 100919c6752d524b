//! Boundary to the external process supervisor.
//!
//! The supervisor runs shell commands on our behalf. Everything it reports
//! is lag-prone: status may trail real completion, and captured logs may be
//! incomplete even after the process settled.

use std::sync::Arc;

use async_trait::async_trait;

use mooring_core::ProcessStatus;

use crate::error::SupervisorError;

/// Buffered output captured by the supervisor so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessLogs {
    pub stdout: String,
    pub stderr: String,
}

impl ProcessLogs {
    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }

    /// `stdout` and `stderr` rendered for a `details` string.
    pub fn render(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => "(no output captured)".to_string(),
            (false, true) => format!("stdout: {stdout}"),
            (true, false) => format!("stderr: {stderr}"),
            (false, false) => format!("stdout: {stdout}\nstderr: {stderr}"),
        }
    }
}

/// A process started by the supervisor. Observed only; never owned.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn id(&self) -> &str;

    /// The command string the process was started with.
    fn command(&self) -> &str;

    /// Re-observe the current status.
    async fn status(&self) -> ProcessStatus;

    /// Exit code, once the supervisor has captured one.
    async fn exit_code(&self) -> Option<i32>;

    async fn logs(&self) -> Result<ProcessLogs, SupervisorError>;

    async fn kill(&self) -> Result<(), SupervisorError>;
}

pub type SharedHandle = Arc<dyn ProcessHandle>;

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start `command` under a shell.
    async fn start(&self, command: &str) -> Result<SharedHandle, SupervisorError>;

    /// Every process the supervisor currently knows about, active or not.
    async fn list_processes(&self) -> Result<Vec<SharedHandle>, SupervisorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_prefers_labelled_streams() {
        let logs = ProcessLogs {
            stdout: "done\n".into(),
            stderr: String::new(),
        };
        assert_eq!(logs.render(), "stdout: done");

        let both = ProcessLogs {
            stdout: "a".into(),
            stderr: "b".into(),
        };
        assert_eq!(both.render(), "stdout: a\nstderr: b");
        assert_eq!(ProcessLogs::default().render(), "(no output captured)");
    }

    #[test]
    fn whitespace_only_logs_are_empty() {
        let logs = ProcessLogs {
            stdout: "  \n".into(),
            stderr: "\n".into(),
        };
        assert!(logs.is_empty());
    }
}
