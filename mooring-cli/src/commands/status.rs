//! `mooring status`: configuration, mount probe, and last marker.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mooring_daemon::protocol::CMD_STATUS;
use mooring_daemon::{send_request, DaemonRequest, LocalSupervisor};
use mooring_sync::pipeline::{self, StatusReport};

use super::block_on;

/// Arguments for `mooring status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = mooring_core::config::load_at(&home).context("failed to load config")?;

        let supervisor = LocalSupervisor::new();
        let report = block_on(pipeline::inspect(&config, &supervisor))?;
        let status = StatusView {
            daemon_running: daemon_answers(&home),
            report,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&status);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusView {
    #[serde(flatten)]
    report: StatusReport,
    daemon_running: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "")]
    key: &'static str,
    #[tabled(rename = "")]
    value: String,
}

/// One attempt, no retry: status must not stall when no daemon exists.
fn daemon_answers(home: &Path) -> bool {
    send_request(home, &DaemonRequest::new(CMD_STATUS)).is_ok_and(|response| response.ok)
}

fn print_table(status: &StatusView) {
    let report = &status.report;
    println!("Mooring v{}", env!("CARGO_PKG_VERSION"));

    let configured = if report.configured {
        "yes".green().to_string()
    } else {
        "no (set R2_ACCESS_KEY_ID, R2_SECRET_ACCESS_KEY, CF_ACCOUNT_ID)"
            .yellow()
            .to_string()
    };
    let mount = match report.mount_state.as_str() {
        "mounted" => report.mount_detail.green().to_string(),
        "unresponsive" => report.mount_detail.red().to_string(),
        _ => report.mount_detail.bright_black().to_string(),
    };
    let daemon = if status.daemon_running {
        "running".green().to_string()
    } else {
        "not running".bright_black().to_string()
    };

    let rows = vec![
        StatusRow {
            key: "storage configured",
            value: configured,
        },
        StatusRow {
            key: "bucket",
            value: report.bucket.clone(),
        },
        StatusRow {
            key: "mount path",
            value: report.mount_path.display().to_string(),
        },
        StatusRow {
            key: "mount",
            value: mount,
        },
        StatusRow {
            key: "last sync",
            value: report
                .last_sync
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        },
        StatusRow {
            key: "daemon",
            value: daemon,
        },
    ];

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if !report.configured {
        println!("Run 'mooring config show' to inspect the effective settings.");
    }
}
