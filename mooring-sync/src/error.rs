//! Error types for mooring-sync.

use std::path::PathBuf;

use thiserror::Error;

use mooring_core::SyncResult;

use crate::stage::ReplicationStage;

/// Maximum characters of captured output carried in `SyncResult::details`.
pub const MAX_DETAILS_CHARS: usize = 4000;

pub const NOT_CONFIGURED: &str = "R2 storage is not configured";
pub const MOUNT_UNAVAILABLE: &str = "Failed to mount R2 storage";
pub const VERIFICATION_TIMED_OUT: &str = "Sync aborted: pre-flight verification timed out";
pub const SYNC_FAILED: &str = "Sync failed";
pub const MARKER_UNVERIFIED: &str = "Sync failed: completion marker could not be verified";
pub const UNEXPECTED: &str = "Sync error";

/// Errors reported by an external process supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The command could not be started at all.
    #[error("failed to start `{command}`: {message}")]
    Start { command: String, message: String },

    /// The handle no longer answers (log fetch, kill).
    #[error("process {id} unavailable: {message}")]
    Unavailable { id: String, message: String },

    /// Process enumeration failed.
    #[error("failed to list processes: {0}")]
    List(String),
}

/// Errors reported by the bucket mount primitive.
#[derive(Debug, Error)]
pub enum MountError {
    /// Something else already holds the mount path (a race with the
    /// platform's own mount bookkeeping, or a leftover mount).
    #[error("mount path already in use: {0}")]
    PathInUse(String),

    #[error("mount failed: {0}")]
    Failed(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Every way a sync run can end without a verified marker.
///
/// None of these escape the orchestrator: [`SyncFailure::into_result`] is the
/// single conversion into the caller-facing [`SyncResult`].
#[derive(Debug, Error)]
pub enum SyncFailure {
    #[error("R2 storage is not configured")]
    NotConfigured,

    #[error("mount at {} unavailable", mount_path.display())]
    MountUnavailable { mount_path: PathBuf },

    #[error("{reason}")]
    PreflightAborted { reason: String, details: String },

    #[error("pre-flight verification produced no sentinel")]
    VerificationTimeout { details: String },

    #[error("{stage} replication failed")]
    ReplicationFailed {
        stage: ReplicationStage,
        details: String,
    },

    #[error("completion marker unverified")]
    MarkerUnverified { details: String },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SyncFailure {
    /// Short classification plus bounded details.
    pub fn into_result(self) -> SyncResult {
        match self {
            SyncFailure::NotConfigured => SyncResult::failed(NOT_CONFIGURED, None),
            SyncFailure::MountUnavailable { mount_path } => SyncResult::failed(
                MOUNT_UNAVAILABLE,
                Some(format!(
                    "could not confirm a live mount at {} after recovery attempts",
                    mount_path.display()
                )),
            ),
            SyncFailure::PreflightAborted { reason, details } => {
                SyncResult::failed(reason, Some(truncate_details(&details)))
            }
            SyncFailure::VerificationTimeout { details } => {
                SyncResult::failed(VERIFICATION_TIMED_OUT, Some(truncate_details(&details)))
            }
            SyncFailure::ReplicationFailed { stage, details } => SyncResult::failed(
                SYNC_FAILED,
                Some(truncate_details(&format!("{stage} stage: {details}"))),
            ),
            SyncFailure::MarkerUnverified { details } => {
                SyncResult::failed(MARKER_UNVERIFIED, Some(truncate_details(&details)))
            }
            SyncFailure::Unexpected(message) => {
                SyncResult::failed(UNEXPECTED, Some(truncate_details(&message)))
            }
        }
    }
}

impl From<SupervisorError> for SyncFailure {
    fn from(err: SupervisorError) -> Self {
        SyncFailure::Unexpected(err.to_string())
    }
}

/// Keep the first [`MAX_DETAILS_CHARS`] characters, marking the cut.
pub fn truncate_details(details: &str) -> String {
    if details.chars().count() <= MAX_DETAILS_CHARS {
        return details.to_string();
    }
    let kept: String = details.chars().take(MAX_DETAILS_CHARS).collect();
    format!("{kept}… [truncated]")
}

/// Convenience constructor for [`MountError::Io`].
pub fn mount_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> MountError {
    MountError::Io {
        path: path.into(),
        source,
    }
}
