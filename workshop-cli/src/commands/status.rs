//! `workshop status`: per-tenant view from the running daemon.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use workshop_daemon::paths::socket_path;
use workshop_daemon::{request_status, DaemonError};

use super::home_dir;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct Tenant {
    name: String,
    in_flight: bool,
    last_outcome: Option<String>,
    #[serde(default)]
    last_error: Option<String>,
    last_reconcile_at: Option<DateTime<Utc>>,
    #[serde(default)]
    installed: Vec<String>,
}

#[derive(Tabled)]
struct TenantRow {
    #[tabled(rename = "workshop")]
    name: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "in flight")]
    in_flight: String,
    #[tabled(rename = "last reconcile")]
    last_reconcile: String,
    #[tabled(rename = "installed")]
    installed: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    let payload = serde_json::json!({
                        "running": false,
                        "socket": socket_path(&home).display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
                    );
                } else {
                    println!("daemon is not running; start it with 'workshop daemon start'");
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to render status JSON")?
            );
            return Ok(());
        }
        print_table(&status)
    }
}

fn print_table(status: &Value) -> Result<()> {
    let tenants: Vec<Tenant> = serde_json::from_value(status["tenants"].clone())
        .context("daemon returned malformed tenant list")?;

    println!(
        "Workshop v{} | daemon up since {} | store {} | {} tenants",
        env!("CARGO_PKG_VERSION"),
        status["started_at"].as_str().unwrap_or("?"),
        status["store"].as_str().unwrap_or("?"),
        tenants.len()
    );
    if tenants.is_empty() {
        println!("No workshops reconciled yet.");
        return Ok(());
    }

    let now = Utc::now();
    let errors: Vec<(String, String)> = tenants
        .iter()
        .filter_map(|t| t.last_error.clone().map(|e| (t.name.clone(), e)))
        .collect();
    let rows: Vec<TenantRow> = tenants
        .into_iter()
        .map(|t| TenantRow {
            outcome: colored_outcome(t.last_outcome.as_deref()),
            in_flight: if t.in_flight { "yes".to_string() } else { "no".to_string() },
            last_reconcile: t
                .last_reconcile_at
                .map(|at| format_age(now, at))
                .unwrap_or_else(|| "never".to_string()),
            installed: if t.installed.is_empty() {
                "-".to_string()
            } else {
                t.installed.join(", ")
            },
            name: t.name,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for (name, error) in errors {
        println!("{} {name}: {error}", "✗".red().bold());
    }
    Ok(())
}

fn colored_outcome(outcome: Option<&str>) -> String {
    match outcome {
        Some("converged") => "converged".green().to_string(),
        Some("requeued") => "requeued".yellow().to_string(),
        Some("failed") => "failed".red().bold().to_string(),
        Some(other) => other.bright_black().to_string(),
        None => "pending".bright_black().to_string(),
    }
}

fn format_age(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn age_uses_the_largest_whole_unit() {
        let now = Utc::now();
        assert_eq!(format_age(now, now - Duration::seconds(5)), "5s ago");
        assert_eq!(format_age(now, now - Duration::minutes(12)), "12m ago");
        assert_eq!(format_age(now, now - Duration::hours(3)), "3h ago");
        assert_eq!(format_age(now, now - Duration::days(2)), "2d ago");
        assert_eq!(format_age(now, now + Duration::seconds(2)), "0s ago");
    }
}
