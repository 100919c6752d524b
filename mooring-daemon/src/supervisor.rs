//! Local process supervisor: runs commands under `sh -c` on this host.
//!
//! Each started process gets a waiter task that owns the child and two
//! reader tasks that append its output to shared buffers. Handles only
//! observe that shared state, so status and logs lag the child slightly,
//! exactly like a remote supervisor would.
//!
//! Every child leads its own process group. A kill signals the group, so
//! anything the shell forked (`[ ! -d x ] || rsync ...`) goes down with it
//! instead of outliving a handle that already reads `killed`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use mooring_core::ProcessStatus;
use mooring_sync::{ProcessHandle, ProcessLogs, ProcessSupervisor, SharedHandle, SupervisorError};

/// Finished processes stay listed this long.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// How long the waiter gives the reader tasks to drain after exit.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct ProcessState {
    status: ProcessStatus,
    exit_code: Option<i32>,
    finished_at: Option<Instant>,
}

pub struct LocalProcess {
    id: String,
    command: String,
    state: Arc<RwLock<ProcessState>>,
    stdout: Arc<RwLock<String>>,
    stderr: Arc<RwLock<String>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl LocalProcess {
    async fn finished_before(&self, cutoff: Instant) -> bool {
        matches!(self.state.read().await.finished_at, Some(at) if at < cutoff)
    }
}

#[async_trait]
impl ProcessHandle for LocalProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn status(&self) -> ProcessStatus {
        self.state.read().await.status.clone()
    }

    async fn exit_code(&self) -> Option<i32> {
        self.state.read().await.exit_code
    }

    async fn logs(&self) -> Result<ProcessLogs, SupervisorError> {
        Ok(ProcessLogs {
            stdout: self.stdout.read().await.clone(),
            stderr: self.stderr.read().await.clone(),
        })
    }

    async fn kill(&self) -> Result<(), SupervisorError> {
        let sender = self.kill_tx.lock().await.take();
        let delivered = match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        };
        if delivered || !self.status().await.is_active() {
            return Ok(());
        }
        Err(SupervisorError::Unavailable {
            id: self.id.clone(),
            message: "kill already requested".to_string(),
        })
    }
}

pub struct LocalSupervisor {
    shell: String,
    retention: Duration,
    next_id: AtomicU64,
    processes: RwLock<HashMap<String, Arc<LocalProcess>>>,
}

impl Default for LocalSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSupervisor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            retention: DEFAULT_RETENTION,
            next_id: AtomicU64::new(1),
            processes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    async fn prune(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.retention) else {
            return;
        };
        let mut expired = Vec::new();
        for (id, process) in self.processes.read().await.iter() {
            if process.finished_before(cutoff).await {
                expired.push(id.clone());
            }
        }
        if expired.is_empty() {
            return;
        }
        let mut processes = self.processes.write().await;
        for id in expired {
            processes.remove(&id);
        }
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn start(&self, command: &str) -> Result<SharedHandle, SupervisorError> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SupervisorError::Start {
                command: command.to_string(),
                message: err.to_string(),
            })?;

        let group = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(Pid::from_raw);
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (kill_tx, kill_rx) = oneshot::channel();
        let process = Arc::new(LocalProcess {
            id: id.clone(),
            command: command.to_string(),
            state: Arc::new(RwLock::new(ProcessState {
                status: ProcessStatus::Starting,
                exit_code: None,
                finished_at: None,
            })),
            stdout: Arc::new(RwLock::new(String::new())),
            stderr: Arc::new(RwLock::new(String::new())),
            kill_tx: Mutex::new(Some(kill_tx)),
        });

        let readers = [
            child
                .stdout
                .take()
                .map(|pipe| spawn_reader(pipe, Arc::clone(&process.stdout))),
            child
                .stderr
                .take()
                .map(|pipe| spawn_reader(pipe, Arc::clone(&process.stderr))),
        ];

        let state = Arc::clone(&process.state);
        let process_id = id.clone();
        tokio::spawn(async move {
            state.write().await.status = ProcessStatus::Running;

            let (status, exit_code) = tokio::select! {
                waited = child.wait() => match waited {
                    Ok(exit) if exit.success() => (ProcessStatus::Completed, exit.code()),
                    Ok(exit) => (ProcessStatus::Failed, exit.code()),
                    Err(err) => {
                        tracing::warn!(process_id = %process_id, error = %err, "wait on child failed");
                        (ProcessStatus::Error, None)
                    }
                },
                Ok(()) = kill_rx => {
                    kill_group(&mut child, group, &process_id).await;
                    (ProcessStatus::Killed, None)
                }
            };

            for reader in readers.into_iter().flatten() {
                let _ = tokio::time::timeout(DRAIN_GRACE, reader).await;
            }

            let mut state = state.write().await;
            state.status = status;
            state.exit_code = exit_code;
            state.finished_at = Some(Instant::now());
            tracing::debug!(process_id = %process_id, status = %state.status, exit_code = ?exit_code, "process finished");
        });

        tracing::debug!(process_id = %id, command, "process started");
        self.processes
            .write()
            .await
            .insert(id, Arc::clone(&process));
        self.prune().await;
        Ok(process)
    }

    async fn list_processes(&self) -> Result<Vec<SharedHandle>, SupervisorError> {
        self.prune().await;
        Ok(self
            .processes
            .read()
            .await
            .values()
            .map(|process| Arc::clone(process) as SharedHandle)
            .collect())
    }
}

/// SIGKILL the child's whole process group, then reap the child. Falls
/// back to killing the shell alone when the group cannot be signalled.
async fn kill_group(child: &mut Child, group: Option<Pid>, process_id: &str) {
    if let Some(group) = group {
        match killpg(group, Signal::SIGKILL) {
            Ok(()) => {
                if let Err(err) = child.wait().await {
                    tracing::warn!(process_id, error = %err, "wait after group kill failed");
                }
                return;
            }
            Err(err) => {
                tracing::warn!(process_id, error = %err, "process group kill failed");
            }
        }
    }
    if let Err(err) = child.kill().await {
        tracing::warn!(process_id, error = %err, "kill failed");
    }
}

fn spawn_reader<R>(mut pipe: R, buffer: Arc<RwLock<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer
                    .write()
                    .await
                    .push_str(&String::from_utf8_lossy(&chunk[..n])),
            }
        }
    })
}
