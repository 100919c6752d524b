//! # mooring-sync
//!
//! Mount reconciliation and sync orchestration over an external process
//! supervisor whose status and captured output may lag reality.
//!
//! Call [`pipeline::run`] for one full sync, [`pipeline::mount`] to only
//! ensure the bucket is mounted, or [`pipeline::inspect`] for a status view.
//! Backends plug in through [`ProcessSupervisor`] and [`MountPrimitive`].

pub mod best_effort;
pub mod commands;
pub mod error;
pub mod mount;
pub mod orchestrator;
pub mod pipeline;
pub mod probe;
pub mod run_log;
pub mod sentinel;
pub mod stage;
pub mod supervisor;
pub mod wait;

pub use best_effort::BestEffort;
pub use error::{MountError, SupervisorError, SyncFailure};
pub use mount::{classify_mount_failure, MountController, MountOptions, MountPrimitive, MountTarget};
pub use orchestrator::{SyncOrchestrator, SyncTimings};
pub use probe::MountProber;
pub use run_log::RunLog;
pub use stage::ReplicationStage;
pub use supervisor::{ProcessHandle, ProcessLogs, ProcessSupervisor, SharedHandle};
pub use wait::{wait_for_process, WaitTimeout};
