//! Shared entrypoints used by the CLI and the daemon processor.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use mooring_core::{Config, MountState, SyncResult};

use crate::commands;
use crate::error::SyncFailure;
use crate::mount::{MountController, MountPrimitive, MountTarget};
use crate::orchestrator::{is_marker_timestamp, SyncOrchestrator, SyncTimings};
use crate::probe::MountProber;
use crate::run_log::RunLog;
use crate::supervisor::ProcessSupervisor;
use crate::wait::{kill_best_effort, wait_for_process};

const STATUS_MARKER_READ: Duration = Duration::from_secs(5);

/// Run one full sync.
///
/// This is the canonical sync entrypoint for both `mooring sync` and the
/// daemon processor.
pub async fn run(
    config: &Config,
    supervisor: &dyn ProcessSupervisor,
    mounter: &dyn MountPrimitive,
) -> SyncResult {
    SyncOrchestrator::new(config, supervisor, mounter).run().await
}

/// Ensure the bucket is mounted without replicating anything.
///
/// Returns the state observed by a fresh probe after the controller
/// reported success.
pub async fn mount(
    config: &Config,
    supervisor: &dyn ProcessSupervisor,
    mounter: &dyn MountPrimitive,
) -> Result<MountState, SyncFailure> {
    let target = MountTarget::from_config(config).ok_or(SyncFailure::NotConfigured)?;
    let timings = SyncTimings::default();
    let controller = MountController::new(supervisor, mounter, target)
        .with_probe_timeout(timings.probe)
        .with_unmount_timeout(timings.unmount);

    let mut log = RunLog::new();
    let mounted = controller.ensure_mounted(&mut log).await;
    if config.verbose {
        let result = if mounted {
            SyncResult::skipped("mount only")
        } else {
            SyncFailure::MountUnavailable {
                mount_path: config.mount_path.clone(),
            }
            .into_result()
        };
        log.flush(&result);
    }
    if !mounted {
        return Err(SyncFailure::MountUnavailable {
            mount_path: config.mount_path.clone(),
        });
    }
    Ok(controller.prober().probe().await)
}

/// Point-in-time view for `mooring status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub configured: bool,
    pub bucket: String,
    pub mount_path: PathBuf,
    pub mount_state: String,
    pub mount_detail: String,
    /// Marker content, read only when the mount answered.
    pub last_sync: Option<String>,
}

/// Probe the mount and read the marker. Starts no mount and no copy.
pub async fn inspect(config: &Config, supervisor: &dyn ProcessSupervisor) -> StatusReport {
    let state = MountProber::new(supervisor, &config.mount_path).probe().await;
    let last_sync = if state.is_mounted() {
        read_last_sync(config, supervisor).await
    } else {
        None
    };

    StatusReport {
        configured: config.is_configured(),
        bucket: config.bucket.clone(),
        mount_path: config.mount_path.clone(),
        mount_state: state.label().to_string(),
        mount_detail: state.to_string(),
        last_sync,
    }
}

async fn read_last_sync(config: &Config, supervisor: &dyn ProcessSupervisor) -> Option<String> {
    let handle = supervisor
        .start(&commands::read_marker(&config.mount_path))
        .await
        .ok()?;
    if wait_for_process(handle.as_ref(), STATUS_MARKER_READ, Duration::from_millis(100))
        .await
        .is_err()
    {
        let _ = kill_best_effort(handle.as_ref()).await;
        return None;
    }
    let logs = handle.logs().await.ok()?;
    let content = logs.stdout.trim();
    is_marker_timestamp(content).then(|| content.to_string())
}
