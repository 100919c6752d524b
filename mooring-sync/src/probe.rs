//! Mount prober.
//!
//! Asks what filesystem type backs the mount path itself rather than
//! reading the kernel mount table: the mount table can disagree with what
//! the mount primitive considers "in use", and a hung FUSE session makes
//! even `stat` block, which is exactly the signal we want.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mooring_core::MountState;

use crate::commands;
use crate::error::SupervisorError;
use crate::sentinel::Sentinel;
use crate::supervisor::ProcessSupervisor;
use crate::wait::{kill_best_effort, poll_logs, wait_for_process};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Extra time allowed for output to show up after the probe settled.
const PROBE_LOG_GRACE: Duration = Duration::from_millis(500);

/// Filesystem types reported for FUSE mounts (`fuse`, `fuse.s3fs`, `fuseblk`).
pub fn is_fuse_type(fs_type: &str) -> bool {
    fs_type.to_ascii_lowercase().starts_with("fuse")
}

/// Map probe stdout to a [`MountState`].
pub fn classify_probe_output(stdout: &str) -> MountState {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    if line.is_empty() || Sentinel::find_in(line).is_some() {
        return MountState::NotMounted { fs_type: None };
    }
    if is_fuse_type(line) {
        MountState::Mounted {
            fs_type: line.to_string(),
        }
    } else {
        MountState::NotMounted {
            fs_type: Some(line.to_string()),
        }
    }
}

pub struct MountProber<'a> {
    supervisor: &'a dyn ProcessSupervisor,
    mount_path: PathBuf,
    timeout: Duration,
}

impl<'a> MountProber<'a> {
    pub fn new(supervisor: &'a dyn ProcessSupervisor, mount_path: &Path) -> Self {
        Self {
            supervisor,
            mount_path: mount_path.to_path_buf(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    /// Take a fresh snapshot. Never fails: a probe that cannot start or
    /// cannot settle is reported as [`MountState::Unresponsive`].
    pub async fn probe(&self) -> MountState {
        self.try_probe().await.unwrap_or_else(|err| {
            tracing::warn!(
                mount_path = %self.mount_path.display(),
                error = %err,
                "could not start mount probe; treating mount as unresponsive",
            );
            MountState::Unresponsive
        })
    }

    /// Like [`probe`](Self::probe), but returns the supervisor's start
    /// error instead of folding it into a state.
    pub async fn try_probe(&self) -> Result<MountState, SupervisorError> {
        let command = commands::fs_type_probe(&self.mount_path);
        let handle = self.supervisor.start(&command).await?;

        if let Err(timeout) =
            wait_for_process(handle.as_ref(), self.timeout, PROBE_POLL_INTERVAL).await
        {
            tracing::warn!(
                mount_path = %self.mount_path.display(),
                last_status = %timeout.last_status,
                waited_ms = timeout.waited.as_millis() as u64,
                "mount probe did not settle; treating mount as unresponsive",
            );
            let _ = kill_best_effort(handle.as_ref()).await;
            return Ok(MountState::Unresponsive);
        }

        let logs = poll_logs(
            handle.as_ref(),
            PROBE_LOG_GRACE,
            PROBE_POLL_INTERVAL,
            |logs| !logs.stdout.trim().is_empty(),
        )
        .await
        .unwrap_or_else(|last| last);

        let state = classify_probe_output(&logs.stdout);
        tracing::debug!(mount_path = %self.mount_path.display(), state = %state, "mount probed");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("fuse.s3fs\n", MountState::Mounted { fs_type: "fuse.s3fs".into() })]
    #[case("fuseblk", MountState::Mounted { fs_type: "fuseblk".into() })]
    #[case("FUSE", MountState::Mounted { fs_type: "FUSE".into() })]
    #[case("ext2/ext3\n", MountState::NotMounted { fs_type: Some("ext2/ext3".into()) })]
    #[case("overlayfs", MountState::NotMounted { fs_type: Some("overlayfs".into()) })]
    #[case("__NO_FS__\n", MountState::NotMounted { fs_type: None })]
    #[case("", MountState::NotMounted { fs_type: None })]
    #[case("\n\n  \n", MountState::NotMounted { fs_type: None })]
    fn classifies_fs_type_output(#[case] stdout: &str, #[case] expected: MountState) {
        assert_eq!(classify_probe_output(stdout), expected);
    }
}
