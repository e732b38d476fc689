//! `gatherd status` and `gatherd gatherer list`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use gatherd_daemon::paths::socket_path;
use gatherd_daemon::{request_status, DaemonError, StatusReport};

use super::home;

/// Arguments for `gatherd status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let report = match request_status(&home) {
            Ok(report) => report,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    let payload = json!({
                        "running": false,
                        "socket": socket_path(&home).display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render status JSON")?
                    );
                } else {
                    println!("running: false");
                    println!("agent is not running");
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query agent status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_summary(&report);
        println!();
        print_table(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct GathererRow {
    #[tabled(rename = "")]
    marker: String,
    #[tabled(rename = "stream")]
    name: String,
    #[tabled(rename = "nickname")]
    nickname: String,
    #[tabled(rename = "datatype")]
    datatype: String,
    #[tabled(rename = "description")]
    description: String,
}

pub fn print_gatherers() -> Result<()> {
    let home = home()?;
    let report = match request_status(&home) {
        Ok(report) => report,
        Err(DaemonError::DaemonNotRunning { socket }) => anyhow::bail!(
            "agent is not running (no socket at {}); start it with `gatherd run`",
            socket.display()
        ),
        Err(err) => return Err(err).context("failed to query agent status"),
    };
    print_table(&report);
    Ok(())
}

fn print_summary(report: &StatusReport) {
    println!("running: {}", flag(report.running));
    println!("syncing: {}", flag(report.syncing));
    println!(
        "local server: {} (run_local {})",
        flag(report.local_server_running),
        report.run_local
    );
    println!("interval: {}s", report.gather_interval_seconds);
}

fn print_table(report: &StatusReport) {
    if report.gatherers.is_empty() {
        println!("No gatherers registered.");
        return;
    }

    let rows: Vec<GathererRow> = report
        .gatherers
        .iter()
        .map(|g| GathererRow {
            marker: if g.active {
                "●".green().bold().to_string()
            } else {
                "○".dimmed().to_string()
            },
            name: g.name.clone(),
            nickname: g.nickname.clone(),
            datatype: g.datatype.clone(),
            description: g.description.clone(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let active = report.gatherers.iter().filter(|g| g.active).count();
    println!("{active} of {} gatherers active", report.gatherers.len());
}

fn flag(on: bool) -> String {
    if on {
        "true".green().to_string()
    } else {
        "false".yellow().to_string()
    }
}
