//! `workshop plan <file>`: the ordered components and the steps each would run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use workshop_converge::{default_installers, describe_plan, ComponentPlan};

use super::{load_document, load_manifests, routing_for};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Workshop document to plan.
    pub file: PathBuf,

    /// Console route host of the target cluster (defaults to the simulated one).
    #[arg(long)]
    pub console_host: Option<String>,

    /// Manifest template override directory.
    #[arg(long)]
    pub templates: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let doc = load_document(&self.file)?;
        let routing = routing_for(self.console_host.as_deref())?;
        let manifests = load_manifests(self.templates.as_deref())?;

        let plan = describe_plan(&doc, &default_installers(), &routing, &manifests)
            .with_context(|| format!("failed to plan workshop '{}'", doc.metadata.name))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        println!(
            "Workshop '{}' | {} users | apps domain {}",
            doc.metadata.name.bold(),
            doc.spec.user_count(),
            routing.apps_suffix
        );
        for component in &plan {
            print_component(component);
        }
        let enabled = plan.iter().filter(|c| c.enabled).count();
        let steps: usize = plan.iter().map(|c| c.steps.len()).sum();
        println!("{enabled} of {} components enabled, {steps} steps", plan.len());
        Ok(())
    }
}

fn print_component(plan: &ComponentPlan) {
    if !plan.enabled {
        println!("{} {} {}", "·".bright_black(), plan.component, "(disabled)".bright_black());
        return;
    }
    println!("{} {}", "✓".green().bold(), plan.component.to_string().bold());
    for step in &plan.steps {
        println!("    {step}");
    }
}
