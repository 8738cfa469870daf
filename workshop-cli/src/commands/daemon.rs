//! `workshop daemon`: foreground runtime and control-socket commands.

use anyhow::{Context, Result};
use clap::Subcommand;

use workshop_daemon::{request_reconcile, request_status, request_stop, start_blocking, DaemonError};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watcher, scheduler, socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Queue one reconcile for a workshop.
    Reconcile {
        /// Workshop name, or `namespace/name` for a namespaced document.
        name: String,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start => start_blocking(&home).context("daemon exited with error"),
        DaemonCommand::Stop => {
            match request_stop(&home) {
                Ok(()) => println!("daemon stop requested"),
                Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
                Err(err) => return Err(err).context("failed to stop daemon"),
            }
            Ok(())
        }
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { socket }) => serde_json::json!({
                    "running": false,
                    "socket": socket.display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            let rendered = serde_json::to_string_pretty(&payload).context("failed to render daemon status JSON")?;
            println!("{rendered}");
            Ok(())
        }
        DaemonCommand::Reconcile { name } => {
            request_reconcile(&home, &name).with_context(|| format!("failed to queue reconcile for '{name}'"))?;
            println!("reconcile queued for '{name}'");
            Ok(())
        }
    }
}
