//! Workshop: convergence orchestration for OpenShift workshop tenants.
//!
//! # Usage
//!
//! ```text
//! workshop init [--name <name>] [--users <n>] [--path <file>]
//! workshop plan <file>
//! workshop converge <file> [--max-ticks <n>] [--rollout-ms <ms>] [--json] [--verbose]
//! workshop diff <old> <new>
//! workshop status [--json]
//! workshop daemon start|stop|status|reconcile <name>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    converge::ConvergeArgs, daemon::DaemonCommand, diff::DiffArgs, init::InitArgs,
    plan::PlanArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "workshop",
    version,
    about = "Converge OpenShift workshop tenants to their desired state",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter Workshop document.
    Init(InitArgs),

    /// Show the components a tick would run, with their steps.
    Plan(PlanArgs),

    /// Converge a document against a simulated cluster.
    Converge(ConvergeArgs),

    /// Diff the resources two documents would apply.
    Diff(DiffArgs),

    /// Show per-tenant status from the running daemon.
    Status(StatusArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Converge(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
