//! Mooring core library: domain types, configuration, errors.
//!
//! - [`types`]: sync results, mount and process states, credentials
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save / environment overrides

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{MountState, ProcessStatus, R2Credentials, SyncResult};
