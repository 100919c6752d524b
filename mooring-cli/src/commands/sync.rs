//! `mooring sync`: one orchestration against the local supervisor.

use anyhow::{Context, Result};
use clap::Args;

use mooring_daemon::{init_tracing, LogTarget, SyncBackends};
use mooring_sync::pipeline;

use super::{block_on, failure_error, print_sync_result};

/// Arguments for `mooring sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Print the result as JSON (`success`, `lastSync`, `error`, `details`).
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(LogTarget::Stderr);
        let config = mooring_core::config::load().context("failed to load config")?;
        let backends = SyncBackends::local();

        let result = block_on(pipeline::run(
            &config,
            backends.supervisor.as_ref(),
            backends.mounter.as_ref(),
        ))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("failed to render sync JSON")?
            );
        } else {
            print_sync_result(&result);
        }

        if result.success {
            Ok(())
        } else {
            Err(failure_error(&result))
        }
    }
}
