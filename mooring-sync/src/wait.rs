//! Bounded waits over supervisor handles.
//!
//! [`wait_for_process`] treats `starting` and `running` alike as "still
//! active": the supervisor shows `starting` before `running`, and a short
//! process may finish without ever being observed as `running`.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};

use mooring_core::ProcessStatus;

use crate::best_effort::{best_effort, BestEffort};
use crate::supervisor::{ProcessHandle, ProcessLogs};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The deadline elapsed while the process was still active.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("process {process_id} still {last_status} after {}ms", waited.as_millis())]
pub struct WaitTimeout {
    pub process_id: String,
    pub last_status: ProcessStatus,
    pub waited: Duration,
}

/// Poll `handle.status()` until it leaves the active set or `timeout` elapses.
///
/// Never fails before `timeout` has fully elapsed. A timeout means
/// "uncertain", not "failed": the caller decides what to do with it.
pub async fn wait_for_process(
    handle: &dyn ProcessHandle,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), WaitTimeout> {
    let started = Instant::now();
    let deadline = started + timeout;
    let poll_interval = if poll_interval.is_zero() {
        DEFAULT_POLL_INTERVAL
    } else {
        poll_interval
    };

    loop {
        let status = handle.status().await;
        if !status.is_active() {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitTimeout {
                process_id: handle.id().to_string(),
                last_status: status,
                waited: now.duration_since(started),
            });
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Poll captured logs until `accept` matches or `window` elapses.
///
/// Returns the matching snapshot, or `Err` with the last snapshot seen so
/// callers can still report what was captured.
pub async fn poll_logs<F>(
    handle: &dyn ProcessHandle,
    window: Duration,
    interval: Duration,
    accept: F,
) -> Result<ProcessLogs, ProcessLogs>
where
    F: Fn(&ProcessLogs) -> bool,
{
    let deadline = Instant::now() + window;
    let mut last = ProcessLogs::default();
    loop {
        match handle.logs().await {
            Ok(logs) => {
                if accept(&logs) {
                    return Ok(logs);
                }
                last = logs;
            }
            Err(err) => {
                tracing::debug!(process = handle.id(), error = %err, "log fetch failed; retrying");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(last);
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// Kill a process whose wait timed out. Failures are logged, never raised.
pub async fn kill_best_effort(handle: &dyn ProcessHandle) -> BestEffort {
    let label = format!("kill {}", handle.id());
    best_effort(&label, handle.kill()).await
}
