pub mod config;
pub mod daemon;
pub mod mount;
pub mod status;
pub mod sync;

use std::future::Future;

use anyhow::{Context, Result};
use colored::Colorize;

use mooring_core::SyncResult;

/// Drive one async pipeline call from a synchronous command.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// Human rendering shared by `sync` and `daemon sync`.
pub(crate) fn print_sync_result(result: &SyncResult) {
    match (result.success, result.last_sync.as_deref()) {
        (true, Some(last_sync)) => {
            println!("{} synced, marker {last_sync}", "✓".green().bold());
        }
        (true, None) => {
            let reason = result.details.as_deref().unwrap_or("nothing to do");
            println!("{} {reason}", "·".bright_black().bold());
        }
        (false, _) => {
            let error = result.error.as_deref().unwrap_or("Sync failed");
            println!("{} {error}", "✗".red().bold());
            if let Some(details) = result.details.as_deref() {
                for line in details.lines() {
                    println!("  {line}");
                }
            }
        }
    }
}

/// The error a failed run surfaces as the process exit.
pub(crate) fn failure_error(result: &SyncResult) -> anyhow::Error {
    anyhow::anyhow!(result
        .error
        .clone()
        .unwrap_or_else(|| "Sync failed".to_string()))
}
