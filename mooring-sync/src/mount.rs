//! Mount controller: idempotently ensure the bucket is mounted.
//!
//! ```text
//! probe ─ Mounted ──────────────────────────────▶ true
//!   ├─ Unresponsive ─ lazy unmount ─ re-probe ─┬─ still Unresponsive ─▶ false
//!   └─ NotMounted ─────────────────────────────┴▶ mount ─ ok ─▶ true
//!                                                   └─ PathInUse ─ re-probe
//!                                                        ├─ Mounted ─▶ true
//!                                                        ├─ Unresponsive ─ unmount ─ mount once more
//!                                                        └─ other ─▶ false
//! ```
//!
//! `ensure_mounted` never raises; `false` means "no durable backing this
//! cycle".

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use mooring_core::{Config, MountState, ProcessStatus, R2Credentials};

use crate::best_effort::{best_effort, BestEffort};
use crate::commands::{self, UNMOUNT_VARIANTS};
use crate::error::MountError;
use crate::probe::MountProber;
use crate::run_log::RunLog;
use crate::supervisor::ProcessSupervisor;
use crate::wait::{kill_best_effort, wait_for_process, WaitTimeout};

pub const DEFAULT_UNMOUNT_TIMEOUT: Duration = Duration::from_secs(5);
const UNMOUNT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Lower-cased fragments that identify a "path already in use" failure in
/// free-text mount errors. Only backends without typed errors need this.
pub const PATH_IN_USE_SIGNATURES: &[&str] = &[
    "already in use",
    "already mounted",
    "is busy",
    "device or resource busy",
    "mountpoint is not empty",
];

/// Classify a free-text mount failure once, at the backend boundary.
pub fn classify_mount_failure(message: &str) -> MountError {
    let lowered = message.to_ascii_lowercase();
    if PATH_IN_USE_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
    {
        MountError::PathInUse(message.trim().to_string())
    } else {
        MountError::Failed(message.trim().to_string())
    }
}

/// Endpoint and explicit credentials for one mount call.
#[derive(Debug, Clone, Copy)]
pub struct MountOptions<'a> {
    pub endpoint: &'a str,
    pub credentials: &'a R2Credentials,
}

/// The external primitive that attaches a bucket to a path.
#[async_trait]
pub trait MountPrimitive: Send + Sync {
    async fn mount(
        &self,
        bucket: &str,
        path: &Path,
        options: MountOptions<'_>,
    ) -> Result<(), MountError>;
}

/// What to mount, and where.
#[derive(Debug, Clone)]
pub struct MountTarget {
    pub bucket: String,
    pub mount_path: PathBuf,
    pub endpoint: String,
    pub credentials: R2Credentials,
}

impl MountTarget {
    /// `None` unless the config carries everything a mount needs.
    pub fn from_config(config: &Config) -> Option<Self> {
        let credentials = config.credentials()?;
        let endpoint = config.endpoint()?;
        Some(Self {
            bucket: config.bucket.clone(),
            mount_path: config.mount_path.clone(),
            endpoint,
            credentials,
        })
    }
}

pub struct MountController<'a> {
    supervisor: &'a dyn ProcessSupervisor,
    mounter: &'a dyn MountPrimitive,
    target: MountTarget,
    prober: MountProber<'a>,
    unmount_timeout: Duration,
}

impl<'a> MountController<'a> {
    pub fn new(
        supervisor: &'a dyn ProcessSupervisor,
        mounter: &'a dyn MountPrimitive,
        target: MountTarget,
    ) -> Self {
        let prober = MountProber::new(supervisor, &target.mount_path);
        Self {
            supervisor,
            mounter,
            target,
            prober,
            unmount_timeout: DEFAULT_UNMOUNT_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.prober = self.prober.with_timeout(timeout);
        self
    }

    pub fn with_unmount_timeout(mut self, timeout: Duration) -> Self {
        self.unmount_timeout = timeout;
        self
    }

    pub fn prober(&self) -> &MountProber<'a> {
        &self.prober
    }

    pub async fn ensure_mounted(&self, log: &mut RunLog) -> bool {
        let state = self.probe(log).await;
        match state {
            MountState::Mounted { .. } => return true,
            MountState::Unresponsive => {
                let _ = self.recover(log).await;
                match self.probe(log).await {
                    MountState::Mounted { .. } => return true,
                    MountState::Unresponsive => {
                        tracing::warn!(
                            mount_path = %self.target.mount_path.display(),
                            "mount path still hangs after unmount recovery; not mounting",
                        );
                        return false;
                    }
                    MountState::NotMounted { .. } => {}
                }
            }
            MountState::NotMounted { .. } => {}
        }

        match self.mount(log).await {
            Ok(()) => true,
            Err(MountError::PathInUse(message)) => self.resolve_path_in_use(message, log).await,
            Err(err) => {
                tracing::warn!(
                    mount_path = %self.target.mount_path.display(),
                    error = %err,
                    "mount failed",
                );
                false
            }
        }
    }

    /// Mount reported a conflict: find out what actually holds the path.
    async fn resolve_path_in_use(&self, original: String, log: &mut RunLog) -> bool {
        match self.probe(log).await {
            MountState::Mounted { .. } => {
                tracing::info!(
                    mount_path = %self.target.mount_path.display(),
                    "mount reported path in use but the bucket is mounted; accepting",
                );
                true
            }
            MountState::Unresponsive => {
                let _ = self.recover(log).await;
                match self.mount(log).await {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(
                            mount_path = %self.target.mount_path.display(),
                            error = %err,
                            "mount retry after recovery failed",
                        );
                        false
                    }
                }
            }
            MountState::NotMounted { .. } => {
                tracing::warn!(
                    mount_path = %self.target.mount_path.display(),
                    error = %original,
                    "mount path in use by something other than the bucket",
                );
                false
            }
        }
    }

    /// A supervisor that refuses to start the fs-type query reads as an
    /// unresponsive mount.
    async fn probe(&self, log: &mut RunLog) -> MountState {
        match self.prober.try_probe().await {
            Ok(state) => {
                log.record(
                    "mount_probe",
                    json!({ "state": state.label(), "detail": state.to_string() }),
                );
                state
            }
            Err(err) => {
                tracing::warn!(
                    mount_path = %self.target.mount_path.display(),
                    error = %err,
                    "could not start mount probe",
                );
                let state = MountState::Unresponsive;
                log.record(
                    "mount_probe",
                    json!({ "state": state.label(), "error": err.to_string() }),
                );
                state
            }
        }
    }

    async fn mount(&self, log: &mut RunLog) -> Result<(), MountError> {
        log.record(
            "mount_attempt",
            json!({ "bucket": self.target.bucket, "path": self.target.mount_path }),
        );
        let options = MountOptions {
            endpoint: &self.target.endpoint,
            credentials: &self.target.credentials,
        };
        let result = self
            .mounter
            .mount(&self.target.bucket, &self.target.mount_path, options)
            .await;
        match &result {
            Ok(()) => log.record("mount_ok", json!({})),
            Err(err) => log.record("mount_error", json!({ "error": err.to_string() })),
        }
        result
    }

    /// Lazy-unmount a hung mount. Each variant is bounded and best-effort;
    /// the first that settles cleanly ends recovery.
    pub async fn recover(&self, log: &mut RunLog) -> BestEffort {
        for variant in UNMOUNT_VARIANTS {
            let command = commands::unmount(variant, &self.target.mount_path);
            let outcome = best_effort(variant, self.run_unmount(&command)).await;
            log.record(
                "unmount_attempt",
                json!({ "command": command, "ok": outcome.is_done() }),
            );
            if outcome.is_done() {
                return BestEffort::Done(());
            }
        }
        BestEffort::Failed("no unmount variant succeeded".to_string())
    }

    async fn run_unmount(&self, command: &str) -> Result<(), UnmountError> {
        let handle = self
            .supervisor
            .start(command)
            .await
            .map_err(|err| UnmountError(err.to_string()))?;

        if let Err(timeout) =
            wait_for_process(handle.as_ref(), self.unmount_timeout, UNMOUNT_POLL_INTERVAL).await
        {
            let _ = kill_best_effort(handle.as_ref()).await;
            return Err(UnmountError::timed_out(timeout));
        }

        let status = handle.status().await;
        match handle.exit_code().await {
            Some(0) => Ok(()),
            Some(code) => Err(UnmountError(format!("exit code {code}"))),
            None if status == ProcessStatus::Completed => Ok(()),
            None => Err(UnmountError(format!("ended with status {status}"))),
        }
    }
}

#[derive(Debug)]
struct UnmountError(String);

impl UnmountError {
    fn timed_out(timeout: WaitTimeout) -> Self {
        Self(timeout.to_string())
    }
}

impl std::fmt::Display for UnmountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("s3fs: MOUNTPOINT directory /data/moltbot is already in use")]
    #[case("fuse: mountpoint is not empty")]
    #[case("mount: /data/moltbot: Device or resource busy.")]
    #[case("InvalidMountConfigError: path already mounted")]
    fn conflict_messages_classify_as_path_in_use(#[case] message: &str) {
        assert!(matches!(
            classify_mount_failure(message),
            MountError::PathInUse(_)
        ));
    }

    #[rstest]
    #[case("s3fs: could not connect to endpoint")]
    #[case("invalid credentials")]
    #[case("")]
    fn other_messages_classify_as_failed(#[case] message: &str) {
        assert!(matches!(
            classify_mount_failure(message),
            MountError::Failed(_)
        ));
    }
}
