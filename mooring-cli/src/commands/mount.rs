//! `mooring mount`

use anyhow::{Context, Result};
use colored::Colorize;

use mooring_daemon::{init_tracing, LogTarget, SyncBackends};
use mooring_sync::pipeline;

use super::{block_on, failure_error, print_sync_result};

pub fn run() -> Result<()> {
    init_tracing(LogTarget::Stderr);
    let config = mooring_core::config::load().context("failed to load config")?;
    let backends = SyncBackends::local();

    let outcome = block_on(pipeline::mount(
        &config,
        backends.supervisor.as_ref(),
        backends.mounter.as_ref(),
    ))?;

    match outcome {
        Ok(state) => {
            println!(
                "{} {} at {} ({state})",
                "✓".green().bold(),
                config.bucket,
                config.mount_path.display()
            );
            Ok(())
        }
        Err(failure) => {
            let result = failure.into_result();
            print_sync_result(&result);
            Err(failure_error(&result))
        }
    }
}
