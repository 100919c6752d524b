//! Scripted fakes for the supervisor and mount boundaries.
//!
//! Commands are matched by substring. One-shot rules are consumed before
//! persistent ones, so a test can script "hang once, then answer". Every
//! start, kill, and mount call lands on one shared timeline.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mooring_core::{Config, ProcessStatus};
use mooring_sync::{
    MountError, MountOptions, MountPrimitive, ProcessHandle, ProcessLogs, ProcessSupervisor,
    SharedHandle, SupervisorError,
};

pub const PROBE: &str = "stat -f -c %T";
pub const PREFLIGHT: &str = "__WORKSPACE_EMPTY__";
pub const COPY: &str = "rsync";
pub const COPY_CONFIG: &str = "'/root/.openclaw'/";
pub const COPY_WORKSPACE: &str = "--exclude='/skills'";
pub const COPY_SKILLS: &str = "[ ! -d";
pub const MARKER_WRITE: &str = "date -Iseconds";
pub const MARKER_READ: &str = "cat '/data/moltbot/.last-sync'";
pub const DIAGNOSTICS: &str = "--- mounts";
pub const UNMOUNT: &str = "umount -l";

pub const MARKER_TIME: &str = "2026-01-27T12:00:00+00:00";

pub type Timeline = Arc<Mutex<Vec<String>>>;

/// How one started process behaves.
#[derive(Debug, Clone)]
pub struct Script {
    statuses: Vec<ProcessStatus>,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    /// `logs()` calls answered with empty output before the real output.
    log_lag: usize,
}

impl Script {
    /// Completes with exit code 0 and no output.
    pub fn ok() -> Self {
        Self {
            statuses: vec![ProcessStatus::Running, ProcessStatus::Completed],
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            log_lag: 0,
        }
    }

    pub fn stdout(text: &str) -> Self {
        Self::ok().with_stdout(text)
    }

    /// Never leaves `running` until killed.
    pub fn hang() -> Self {
        Self {
            statuses: vec![ProcessStatus::Running],
            exit_code: None,
            ..Self::ok()
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            statuses: vec![ProcessStatus::Running, ProcessStatus::Failed],
            exit_code: Some(code),
            ..Self::ok()
        }
    }

    pub fn with_stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }

    pub fn with_stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_string();
        self
    }

    /// Keep the status sequence but report `code` on exit.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_log_lag(mut self, polls: usize) -> Self {
        self.log_lag = polls;
        self
    }
}

pub struct FakeHandle {
    id: String,
    command: String,
    script: Script,
    polls: AtomicUsize,
    log_polls: AtomicUsize,
    killed: AtomicBool,
    timeline: Timeline,
}

impl FakeHandle {
    /// A process that was already running before the test started.
    pub fn preset(id: &str, command: &str, status: ProcessStatus, timeline: &Timeline) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            command: command.to_string(),
            script: Script {
                statuses: vec![status],
                ..Script::ok()
            },
            polls: AtomicUsize::new(0),
            log_polls: AtomicUsize::new(0),
            killed: AtomicBool::new(false),
            timeline: Arc::clone(timeline),
        })
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn status(&self) -> ProcessStatus {
        if self.killed.load(Ordering::SeqCst) {
            return ProcessStatus::Killed;
        }
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        let statuses = &self.script.statuses;
        statuses[n.min(statuses.len() - 1)].clone()
    }

    async fn exit_code(&self) -> Option<i32> {
        self.script.exit_code
    }

    async fn logs(&self) -> Result<ProcessLogs, SupervisorError> {
        let n = self.log_polls.fetch_add(1, Ordering::SeqCst);
        if n < self.script.log_lag {
            return Ok(ProcessLogs::default());
        }
        Ok(ProcessLogs {
            stdout: self.script.stdout.clone(),
            stderr: self.script.stderr.clone(),
        })
    }

    async fn kill(&self) -> Result<(), SupervisorError> {
        self.killed.store(true, Ordering::SeqCst);
        self.timeline
            .lock()
            .unwrap()
            .push(format!("kill: {}", self.command));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSupervisor {
    once: Mutex<Vec<(String, Script)>>,
    rules: Mutex<Vec<(String, Script)>>,
    started: Mutex<Vec<Arc<FakeHandle>>>,
    preset: Mutex<Vec<Arc<FakeHandle>>>,
    refused: Mutex<Vec<String>>,
    list_fails: AtomicBool,
    next_id: AtomicUsize,
    timeline: Timeline,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeline(timeline: &Timeline) -> Self {
        Self {
            timeline: Arc::clone(timeline),
            ..Self::default()
        }
    }

    /// Every command containing `pattern` behaves like `script`.
    pub fn on(&self, pattern: &str, script: Script) -> &Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), script));
        self
    }

    /// The next command containing `pattern` behaves like `script`.
    pub fn once(&self, pattern: &str, script: Script) -> &Self {
        self.once
            .lock()
            .unwrap()
            .push((pattern.to_string(), script));
        self
    }

    pub fn preset_process(&self, command: &str, status: ProcessStatus) -> Arc<FakeHandle> {
        let id = format!("preset-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let handle = FakeHandle::preset(&id, command, status, &self.timeline);
        self.preset.lock().unwrap().push(Arc::clone(&handle));
        handle
    }

    /// Commands containing `pattern` fail to start at all.
    pub fn refuse(&self, pattern: &str) -> &Self {
        self.refused.lock().unwrap().push(pattern.to_string());
        self
    }

    pub fn fail_listing(&self) {
        self.list_fails.store(true, Ordering::SeqCst);
    }

    pub fn timeline(&self) -> Timeline {
        Arc::clone(&self.timeline)
    }

    pub fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.command.clone())
            .collect()
    }

    pub fn started_matching(&self, pattern: &str) -> Vec<String> {
        self.started()
            .into_iter()
            .filter(|command| command.contains(pattern))
            .collect()
    }

    pub fn handles_matching(&self, pattern: &str) -> Vec<Arc<FakeHandle>> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.command.contains(pattern))
            .cloned()
            .collect()
    }

    fn script_for(&self, command: &str) -> Script {
        let mut once = self.once.lock().unwrap();
        if let Some(pos) = once.iter().position(|(p, _)| command.contains(p.as_str())) {
            return once.remove(pos).1;
        }
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| command.contains(p.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(Script::ok)
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(&self, command: &str) -> Result<SharedHandle, SupervisorError> {
        let refused = self
            .refused
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| command.contains(pattern.as_str()));
        if refused {
            self.timeline
                .lock()
                .unwrap()
                .push(format!("refused: {command}"));
            return Err(SupervisorError::Start {
                command: command.to_string(),
                message: "supervisor offline".into(),
            });
        }
        let script = self.script_for(command);
        let handle = Arc::new(FakeHandle {
            id: format!("proc-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            command: command.to_string(),
            script,
            polls: AtomicUsize::new(0),
            log_polls: AtomicUsize::new(0),
            killed: AtomicBool::new(false),
            timeline: Arc::clone(&self.timeline),
        });
        self.timeline
            .lock()
            .unwrap()
            .push(format!("start: {command}"));
        self.started.lock().unwrap().push(Arc::clone(&handle));
        Ok(handle)
    }

    async fn list_processes(&self) -> Result<Vec<SharedHandle>, SupervisorError> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(SupervisorError::List("supervisor offline".into()));
        }
        let preset = self.preset.lock().unwrap();
        let started = self.started.lock().unwrap();
        Ok(preset
            .iter()
            .chain(started.iter())
            .map(|h| Arc::clone(h) as SharedHandle)
            .collect())
    }
}

/// Mount primitive answering from a queue; `Ok` once the queue is empty.
pub struct FakeMount {
    results: Mutex<VecDeque<Result<(), MountError>>>,
    calls: Mutex<Vec<(String, PathBuf, String)>>,
    timeline: Timeline,
}

impl FakeMount {
    pub fn new(timeline: &Timeline) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            timeline: Arc::clone(timeline),
        }
    }

    pub fn then(&self, result: Result<(), MountError>) -> &Self {
        self.results.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_endpoint(&self) -> Option<String> {
        self.calls.lock().unwrap().last().map(|c| c.2.clone())
    }
}

#[async_trait]
impl MountPrimitive for FakeMount {
    async fn mount(
        &self,
        bucket: &str,
        path: &Path,
        options: MountOptions<'_>,
    ) -> Result<(), MountError> {
        self.timeline
            .lock()
            .unwrap()
            .push(format!("mount: {bucket} {}", path.display()));
        self.calls.lock().unwrap().push((
            bucket.to_string(),
            path.to_path_buf(),
            options.endpoint.to_string(),
        ));
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Supervisor + mount sharing one timeline.
pub fn fakes() -> (FakeSupervisor, FakeMount) {
    let timeline: Timeline = Arc::default();
    (
        FakeSupervisor::with_timeline(&timeline),
        FakeMount::new(&timeline),
    )
}

/// Fully configured, default paths.
pub fn configured() -> Config {
    Config {
        account_id: Some("acct123".into()),
        access_key_id: Some("AKIDEXAMPLE".into()),
        secret_access_key: Some("s3cr3t".into()),
        ..Config::default()
    }
}

/// Mounted, pre-flight ok, clean copies, marker readable.
pub fn script_happy_path(supervisor: &FakeSupervisor) {
    supervisor
        .on(PROBE, Script::stdout("fuse.s3fs\n"))
        .on(PREFLIGHT, Script::stdout("__OK__\n"))
        .on(MARKER_READ, Script::stdout(&format!("{MARKER_TIME}\n")));
}

/// Position of the first timeline entry containing `needle`.
pub fn position(timeline: &Timeline, needle: &str) -> Option<usize> {
    timeline
        .lock()
        .unwrap()
        .iter()
        .position(|entry| entry.contains(needle))
}
