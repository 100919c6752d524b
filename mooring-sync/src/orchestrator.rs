//! Sync orchestrator.
//!
//! ```text
//! ConfigGate → DedupCheck → EnsureMounted → PreflightVerify
//!   → Replicate[config → workspace → skills] → WriteMarker → VerifyMarker
//!   → Success | Failed + Diagnostics
//! ```
//!
//! One external operation at a time. Every stage gates the next, and every
//! failure is folded into a [`SyncResult`] at [`SyncOrchestrator::run`]; no
//! error reaches the caller.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;

use mooring_core::{Config, ProcessStatus, SyncResult};

use crate::best_effort::best_effort;
use crate::commands;
use crate::error::{SupervisorError, SyncFailure};
use crate::mount::{MountController, MountPrimitive, MountTarget};
use crate::run_log::RunLog;
use crate::sentinel::Sentinel;
use crate::stage::ReplicationStage;
use crate::supervisor::{ProcessLogs, ProcessSupervisor};
use crate::wait::{kill_best_effort, poll_logs, wait_for_process, WaitTimeout, DEFAULT_POLL_INTERVAL};

/// Prefix of the `details` returned when another replication is in flight.
pub const SKIPPED_PREFIX: &str = "Skipped: another rsync appears to be running";

/// Wall-clock bounds for every external step of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTimings {
    pub probe: Duration,
    pub unmount: Duration,
    pub preflight: Duration,
    pub stage: Duration,
    pub marker_write: Duration,
    pub marker_verify: Duration,
    /// Upper bound on a single marker read inside the verify window.
    pub marker_read: Duration,
    pub diagnostics: Duration,
    pub poll_interval: Duration,
    pub log_poll_interval: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(5),
            unmount: Duration::from_secs(5),
            preflight: Duration::from_secs(10),
            stage: Duration::from_secs(10 * 60),
            marker_write: Duration::from_secs(10),
            marker_verify: Duration::from_secs(10),
            marker_read: Duration::from_secs(2),
            diagnostics: Duration::from_secs(10),
            poll_interval: DEFAULT_POLL_INTERVAL,
            log_poll_interval: Duration::from_millis(250),
        }
    }
}

/// A replication stage that did not finish cleanly.
///
/// Raised inside the stage loop and converted into
/// [`SyncFailure::ReplicationFailed`] at the orchestrator boundary.
#[derive(Debug, Error)]
enum StageError {
    #[error("timed out ({timeout}); kill {kill}")]
    TimedOut {
        stage: ReplicationStage,
        timeout: WaitTimeout,
        kill: &'static str,
    },

    #[error("ended with status {status}, exit code {exit_code}\n{output}")]
    Exited {
        stage: ReplicationStage,
        status: ProcessStatus,
        exit_code: String,
        output: String,
    },

    #[error("could not start: {source}")]
    Start {
        stage: ReplicationStage,
        #[source]
        source: SupervisorError,
    },
}

impl StageError {
    fn stage(&self) -> ReplicationStage {
        match self {
            StageError::TimedOut { stage, .. }
            | StageError::Exited { stage, .. }
            | StageError::Start { stage, .. } => *stage,
        }
    }
}

impl From<StageError> for SyncFailure {
    fn from(err: StageError) -> Self {
        match err {
            // The copy never ran: nothing about the tree is known.
            StageError::Start { source, .. } => SyncFailure::from(source),
            other => SyncFailure::ReplicationFailed {
                stage: other.stage(),
                details: other.to_string(),
            },
        }
    }
}

pub struct SyncOrchestrator<'a> {
    config: &'a Config,
    supervisor: &'a dyn ProcessSupervisor,
    mounter: &'a dyn MountPrimitive,
    timings: SyncTimings,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        config: &'a Config,
        supervisor: &'a dyn ProcessSupervisor,
        mounter: &'a dyn MountPrimitive,
    ) -> Self {
        Self {
            config,
            supervisor,
            mounter,
            timings: SyncTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: SyncTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn timings(&self) -> &SyncTimings {
        &self.timings
    }

    /// Run one sync. Never fails; the outcome is the returned result.
    pub async fn run(&self) -> SyncResult {
        let mut log = RunLog::new();
        self.run_logged(&mut log).await
    }

    /// [`run`](Self::run), recording into a caller-owned run log.
    pub async fn run_logged(&self, log: &mut RunLog) -> SyncResult {
        log.record(
            "sync_start",
            json!({ "bucket": self.config.bucket, "mount_path": self.config.mount_path }),
        );

        let result = match self.execute(log).await {
            Ok(result) => result,
            Err(failure) => {
                tracing::warn!(run_id = log.run_id(), error = %failure, "sync failed");
                log.record("sync_failed", json!({ "error": failure.to_string() }));
                failure.into_result()
            }
        };

        log.record(
            "sync_end",
            json!({ "success": result.success, "error": result.error }),
        );
        if self.config.verbose {
            log.flush(&result);
        }
        result
    }

    async fn execute(&self, log: &mut RunLog) -> Result<SyncResult, SyncFailure> {
        let target = MountTarget::from_config(self.config).ok_or(SyncFailure::NotConfigured)?;

        if let Some(process_id) = self.find_active_replication(log).await {
            tracing::info!(run_id = log.run_id(), process_id = %process_id, "replication already running; skipping");
            return Ok(SyncResult::skipped(format!(
                "{SKIPPED_PREFIX} (process {process_id})"
            )));
        }

        let controller = MountController::new(self.supervisor, self.mounter, target)
            .with_probe_timeout(self.timings.probe)
            .with_unmount_timeout(self.timings.unmount);
        if !controller.ensure_mounted(log).await {
            return Err(SyncFailure::MountUnavailable {
                mount_path: self.config.mount_path.clone(),
            });
        }

        self.preflight(log).await?;

        for stage in ReplicationStage::ALL {
            self.replicate(stage, log).await?;
        }

        self.write_marker(log).await;
        match self.verify_marker(log).await {
            Ok(timestamp) => {
                tracing::info!(run_id = log.run_id(), last_sync = %timestamp, "sync complete");
                Ok(SyncResult::synced(timestamp))
            }
            Err(last_read) => {
                let diagnostics = self.collect_diagnostics(log).await;
                Err(SyncFailure::MarkerUnverified {
                    details: format!("last marker read: {last_read:?}\n{diagnostics}"),
                })
            }
        }
    }

    /// Id of a live copy process already targeting this mount, if any.
    /// Enumeration problems are logged and treated as "none".
    async fn find_active_replication(&self, log: &mut RunLog) -> Option<String> {
        let processes = match self.supervisor.list_processes().await {
            Ok(processes) => processes,
            Err(err) => {
                tracing::warn!(error = %err, "could not list processes; skipping dedup check");
                log.record("dedup_unavailable", json!({ "error": err.to_string() }));
                return None;
            }
        };

        for handle in processes {
            let command = handle.command();
            if !commands::copies_into_mount(command, &self.config.mount_path) {
                continue;
            }
            if handle.status().await.is_active() {
                log.record(
                    "dedup_hit",
                    json!({ "process_id": handle.id(), "command": command }),
                );
                return Some(handle.id().to_string());
            }
        }
        log.record("dedup_clear", json!({}));
        None
    }

    /// Read the pre-flight sentinel from captured output, not from status.
    async fn preflight(&self, log: &mut RunLog) -> Result<(), SyncFailure> {
        let handle = self.supervisor.start(&commands::preflight(self.config)).await?;
        log.record("preflight_start", json!({ "process_id": handle.id() }));

        let polled = poll_logs(
            handle.as_ref(),
            self.timings.preflight,
            self.timings.log_poll_interval,
            |logs| preflight_sentinel(logs).is_some(),
        )
        .await;

        let logs = match polled {
            Ok(logs) => logs,
            Err(last) => {
                let _ = kill_best_effort(handle.as_ref()).await;
                log.record("preflight_timeout", json!({}));
                return Err(SyncFailure::VerificationTimeout {
                    details: last.render(),
                });
            }
        };

        let sentinel = preflight_sentinel(&logs);
        log.record(
            "preflight_result",
            json!({ "sentinel": sentinel.map(Sentinel::token) }),
        );
        match sentinel {
            Some(Sentinel::Missing) => {
                let critical = self.config.config_dir.join(&self.config.critical_file);
                Err(SyncFailure::PreflightAborted {
                    reason: format!("Sync aborted: source missing {}", self.config.critical_file),
                    details: format!(
                        "{} does not exist; refusing to mirror an incomplete config over the backup",
                        critical.display()
                    ),
                })
            }
            Some(Sentinel::WorkspaceEmpty) => Err(SyncFailure::PreflightAborted {
                reason: "Sync aborted: local workspace appears empty".to_string(),
                details: format!(
                    "{} is empty while {} has content; a delete-mirroring copy would wipe the backup",
                    self.config.workspace_dir.display(),
                    ReplicationStage::Workspace
                        .destination(&self.config.mount_path)
                        .display()
                ),
            }),
            _ => Ok(()),
        }
    }

    async fn replicate(&self, stage: ReplicationStage, log: &mut RunLog) -> Result<(), StageError> {
        let command = commands::replicate(stage, self.config);
        let handle = self
            .supervisor
            .start(&command)
            .await
            .map_err(|source| StageError::Start { stage, source })?;
        log.record(
            "stage_start",
            json!({ "stage": stage.label(), "process_id": handle.id() }),
        );
        tracing::info!(stage = stage.label(), process_id = handle.id(), "replication stage started");

        if let Err(timeout) =
            wait_for_process(handle.as_ref(), self.timings.stage, self.timings.poll_interval).await
        {
            let kill = if kill_best_effort(handle.as_ref()).await.is_done() {
                "delivered"
            } else {
                "failed"
            };
            log.record(
                "stage_timeout",
                json!({ "stage": stage.label(), "waited_ms": timeout.waited.as_millis() as u64, "kill": kill }),
            );
            return Err(StageError::TimedOut {
                stage,
                timeout,
                kill,
            });
        }

        let status = handle.status().await;
        let exit_code = handle.exit_code().await;
        let failed = matches!(
            status,
            ProcessStatus::Failed | ProcessStatus::Killed | ProcessStatus::Error
        ) || exit_code.is_some_and(|code| code != 0);

        if failed {
            let output = handle.logs().await.unwrap_or_default().render();
            log.record(
                "stage_failed",
                json!({ "stage": stage.label(), "status": status.as_str(), "exit_code": exit_code }),
            );
            return Err(StageError::Exited {
                stage,
                status,
                exit_code: exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                output,
            });
        }

        log.record(
            "stage_done",
            json!({ "stage": stage.label(), "exit_code": exit_code }),
        );
        Ok(())
    }

    /// The write is not trusted on its own; [`verify_marker`](Self::verify_marker) decides.
    async fn write_marker(&self, log: &mut RunLog) {
        let command = commands::write_marker(&self.config.mount_path);
        let handle = match self.supervisor.start(&command).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(error = %err, "could not start marker write");
                log.record("marker_write", json!({ "started": false }));
                return;
            }
        };
        let settled = wait_for_process(
            handle.as_ref(),
            self.timings.marker_write,
            self.timings.poll_interval,
        )
        .await
        .is_ok();
        if !settled {
            let _ = kill_best_effort(handle.as_ref()).await;
        }
        log.record(
            "marker_write",
            json!({ "started": true, "settled": settled, "exit_code": handle.exit_code().await }),
        );
    }

    /// Read the marker back until it looks like a date or the window closes.
    /// `Err` carries the last content read.
    async fn verify_marker(&self, log: &mut RunLog) -> Result<String, String> {
        let command = commands::read_marker(&self.config.mount_path);
        let deadline = Instant::now() + self.timings.marker_verify;
        let mut last_read = String::new();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(content) = self.read_marker_once(&command, remaining).await {
                if is_marker_timestamp(&content) {
                    log.record(
                        "marker_verified",
                        json!({ "attempts": attempts, "content": content }),
                    );
                    return Ok(content);
                }
                last_read = content;
            }

            let now = Instant::now();
            if now >= deadline {
                log.record(
                    "marker_unverified",
                    json!({ "attempts": attempts, "last_read": last_read }),
                );
                return Err(last_read);
            }
            tokio::time::sleep(self.timings.log_poll_interval.min(deadline - now)).await;
        }
    }

    async fn read_marker_once(&self, command: &str, remaining: Duration) -> Option<String> {
        let handle = match self.supervisor.start(command).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::debug!(error = %err, "marker read did not start");
                return None;
            }
        };
        let budget = remaining.min(self.timings.marker_read);
        if wait_for_process(handle.as_ref(), budget, self.timings.log_poll_interval)
            .await
            .is_err()
        {
            let _ = kill_best_effort(handle.as_ref()).await;
        }
        let logs = handle.logs().await.ok()?;
        let line = logs
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())?;
        Some(line.to_string())
    }

    /// Snapshot of mounts and trees for a failure report. Never fails.
    async fn collect_diagnostics(&self, log: &mut RunLog) -> String {
        let command = commands::diagnostics(self.config);
        let timeout = self.timings.diagnostics;
        let poll = self.timings.poll_interval;
        let outcome = best_effort("diagnostics", async {
            let handle = self.supervisor.start(&command).await?;
            if wait_for_process(handle.as_ref(), timeout, poll).await.is_err() {
                let _ = kill_best_effort(handle.as_ref()).await;
            }
            handle.logs().await
        })
        .await;

        let rendered = match outcome.ok() {
            Some(logs) => render_diagnostics(&logs),
            None => "diagnostics unavailable".to_string(),
        };
        log.record("diagnostics", json!({ "chars": rendered.chars().count() }));
        rendered
    }
}

fn render_diagnostics(logs: &ProcessLogs) -> String {
    format!("diagnostics:\n{}", logs.render())
}

/// Only the tokens the pre-flight script can print.
fn preflight_sentinel(logs: &ProcessLogs) -> Option<Sentinel> {
    Sentinel::find_in(&logs.stdout).filter(|sentinel| {
        matches!(
            sentinel,
            Sentinel::Ok | Sentinel::Missing | Sentinel::WorkspaceEmpty
        )
    })
}

fn marker_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\d{4}-\d{2}").ok())
        .as_ref()
}

/// `true` when `content` starts like an ISO-8601 date (`YYYY-MM`).
pub fn is_marker_timestamp(content: &str) -> bool {
    marker_pattern().is_some_and(|pattern| pattern.is_match(content.trim()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("2026-01-27T12:00:00+00:00", true)]
    #[case("  2026-01-27T12:00:00+00:00\n", true)]
    #[case("2026-01", true)]
    #[case("", false)]
    #[case("cat: /data/moltbot/.last-sync: No such file or directory", false)]
    #[case("26-01-27", false)]
    fn marker_shape(#[case] content: &str, #[case] expected: bool) {
        assert_eq!(is_marker_timestamp(content), expected);
    }

    #[test]
    fn preflight_ignores_probe_only_tokens() {
        let logs = ProcessLogs {
            stdout: "__NO_FS__\n".into(),
            stderr: String::new(),
        };
        assert_eq!(preflight_sentinel(&logs), None);
    }

    #[test]
    fn stage_timeout_becomes_replication_failure() {
        let err = StageError::TimedOut {
            stage: ReplicationStage::Skills,
            timeout: WaitTimeout {
                process_id: "p9".into(),
                last_status: ProcessStatus::Running,
                waited: Duration::from_secs(600),
            },
            kill: "delivered",
        };
        let result = SyncFailure::from(err).into_result();
        assert_eq!(result.error.as_deref(), Some("Sync failed"));
        let details = result.details.unwrap_or_default();
        assert!(details.starts_with("skills stage: timed out"), "{details}");
        assert!(details.contains("kill delivered"), "{details}");
    }

    #[test]
    fn stage_start_error_is_unexpected() {
        let err = StageError::Start {
            stage: ReplicationStage::Config,
            source: SupervisorError::Start {
                command: "rsync".into(),
                message: "supervisor offline".into(),
            },
        };
        let result = SyncFailure::from(err).into_result();
        assert_eq!(result.error.as_deref(), Some("Sync error"));
    }
}
