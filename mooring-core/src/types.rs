//! Domain types shared by the sync engine, the daemon, and the CLI.
//!
//! Nothing here is persisted except [`SyncResult`], which is serialized as
//! the JSON payload of `mooring sync --json` and the daemon `sync` reply.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Explicit R2 access key pair handed to the mount primitive.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct R2Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for R2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("R2Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mount state
// ---------------------------------------------------------------------------

/// Snapshot of what backs the mount path at the instant of one probe.
///
/// A `MountState` is never cached: anything that may change the mount (an
/// unmount attempt, a failed mount) must be followed by a fresh probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    /// A FUSE-family filesystem is attached and answered the probe.
    Mounted { fs_type: String },
    /// Nothing answered, or a non-FUSE filesystem occupies the path.
    NotMounted { fs_type: Option<String> },
    /// The probe itself did not settle within its budget (hung mount).
    Unresponsive,
}

impl MountState {
    pub fn is_mounted(&self) -> bool {
        matches!(self, MountState::Mounted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MountState::Mounted { .. } => "mounted",
            MountState::NotMounted { .. } => "not-mounted",
            MountState::Unresponsive => "unresponsive",
        }
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountState::Mounted { fs_type } => write!(f, "mounted ({fs_type})"),
            MountState::NotMounted { fs_type: Some(fs_type) } => {
                write!(f, "not mounted (path occupied by {fs_type})")
            }
            MountState::NotMounted { fs_type: None } => write!(f, "not mounted"),
            MountState::Unresponsive => write!(f, "unresponsive"),
        }
    }
}

// ---------------------------------------------------------------------------
// Process status
// ---------------------------------------------------------------------------

/// Status reported by the external process supervisor.
///
/// The supervisor's value is lag-prone: a process may read `running` after
/// its output is already complete, or `completed` before logs are flushed.
/// Unknown values are kept verbatim in [`ProcessStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Killed,
    Error,
    Other(String),
}

impl ProcessStatus {
    /// `starting` and `running` are both "still active".
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Running)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Killed => "killed",
            ProcessStatus::Error => "error",
            ProcessStatus::Other(raw) => raw.as_str(),
        }
    }
}

impl FromStr for ProcessStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "starting" => ProcessStatus::Starting,
            "running" => ProcessStatus::Running,
            "completed" => ProcessStatus::Completed,
            "failed" => ProcessStatus::Failed,
            "killed" => ProcessStatus::Killed,
            "error" => ProcessStatus::Error,
            _ => ProcessStatus::Other(s.to_string()),
        })
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sync result
// ---------------------------------------------------------------------------

/// The single externally observable outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SyncResult {
    /// A verified sync; `last_sync` is the marker text read back from the mount.
    pub fn synced(last_sync: impl Into<String>) -> Self {
        Self {
            success: true,
            last_sync: Some(last_sync.into()),
            error: None,
            details: None,
        }
    }

    /// A run that deliberately did nothing (e.g. another run is in flight).
    pub fn skipped(details: impl Into<String>) -> Self {
        Self {
            success: true,
            last_sync: None,
            error: None,
            details: Some(details.into()),
        }
    }

    pub fn failed(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            last_sync: None,
            error: Some(error.into()),
            details,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_and_running_are_active() {
        assert!(ProcessStatus::Starting.is_active());
        assert!(ProcessStatus::Running.is_active());
        assert!(!ProcessStatus::Completed.is_active());
        assert!(!ProcessStatus::Failed.is_active());
        assert!(!ProcessStatus::Other("queued".into()).is_active());
    }

    #[test]
    fn unknown_status_is_preserved() {
        let status: ProcessStatus = "Draining".parse().unwrap();
        assert_eq!(status, ProcessStatus::Other("Draining".into()));
        assert_eq!(status.to_string(), "Draining");
    }

    #[test]
    fn known_status_parse_ignores_case_and_whitespace() {
        assert_eq!(" RUNNING ".parse::<ProcessStatus>().unwrap(), ProcessStatus::Running);
        assert_eq!("completed".parse::<ProcessStatus>().unwrap(), ProcessStatus::Completed);
    }

    #[test]
    fn mount_state_display() {
        let mounted = MountState::Mounted {
            fs_type: "fuse.s3fs".into(),
        };
        assert_eq!(mounted.to_string(), "mounted (fuse.s3fs)");
        assert_eq!(
            MountState::NotMounted {
                fs_type: Some("ext2/ext3".into())
            }
            .to_string(),
            "not mounted (path occupied by ext2/ext3)"
        );
        assert_eq!(MountState::Unresponsive.label(), "unresponsive");
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = R2Credentials {
            access_key_id: "AKID".into(),
            secret_access_key: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("hunter2"));
    }
}
