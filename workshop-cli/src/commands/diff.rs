//! `workshop diff <old> <new>`: what changes on the cluster between two
//! versions of a document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use workshop_converge::{default_installers, diff_documents, ChangeKind, ResourceDiff};

use super::{load_document, load_manifests, routing_for};

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Current document.
    pub old: PathBuf,

    /// Proposed document.
    pub new: PathBuf,

    /// Console route host of the target cluster (defaults to the simulated one).
    #[arg(long)]
    pub console_host: Option<String>,

    /// Manifest template override directory.
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let old = load_document(&self.old)?;
        let new = load_document(&self.new)?;
        let routing = routing_for(self.console_host.as_deref())?;
        let manifests = load_manifests(self.templates.as_deref())?;

        let diffs = diff_documents(&old, &new, &default_installers(), &routing, &manifests)
            .context("failed to render documents for diff")?;

        if diffs.is_empty() {
            println!("No differences.");
            return Ok(());
        }
        for diff in &diffs {
            print_diff(diff);
        }
        println!("{} resource(s) differ", diffs.len());
        Ok(())
    }
}

fn print_diff(diff: &ResourceDiff) {
    let header = match diff.change {
        ChangeKind::Added => format!("+ {}", diff.target).green(),
        ChangeKind::Removed => format!("- {} (pruned)", diff.target).red(),
        ChangeKind::Changed => format!("~ {}", diff.target).yellow(),
    };
    println!("{}", header.bold());
    for line in diff.unified_diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            println!("{}", line.bold());
        } else if line.starts_with('+') {
            println!("{}", line.green());
        } else if line.starts_with('-') {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
}
