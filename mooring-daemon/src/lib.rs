//! Mooring daemon: periodic sync scheduler, serialized sync processor, and
//! a Unix-socket control server, plus the local backends they drive.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod s3fs;
pub mod supervisor;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{
    init_tracing, run, run_with, start_blocking, DaemonState, LogTarget, SyncBackends,
};
pub use s3fs::S3fsMount;
pub use supervisor::LocalSupervisor;
