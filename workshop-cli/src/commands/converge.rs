//! `workshop converge <file>`: tick a document to convergence against a
//! simulated cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use workshop_converge::{
    ComponentOutcome, ConvergeConfig, ConvergeError, MemoryStore, Orchestrator, ReconcileOutcome,
    RecordingTransport, Simulation, TickReport,
};
use workshop_core::Component;
use workshop_daemon::upsert_workshop;

use super::{load_document, load_manifests};

#[derive(Args, Debug)]
pub struct ConvergeArgs {
    /// Workshop document to converge.
    pub file: PathBuf,

    /// Give up after this many ticks.
    #[arg(long, default_value_t = 20)]
    pub max_ticks: usize,

    /// How long simulated workloads take to become ready.
    #[arg(long, default_value_t = 0)]
    pub rollout_ms: u64,

    /// Outer deadline for one tick; readiness waits longer than this requeue.
    #[arg(long)]
    pub tick_budget_secs: Option<u64>,

    /// Manifest template override directory.
    #[arg(long)]
    pub templates: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Debug-level engine logs on stderr.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct TickRecord {
    tick: usize,
    outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<TickReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    component: Option<Component>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConvergeSummary {
    workshop: String,
    converged: bool,
    ticks: Vec<TickRecord>,
    remote_calls: usize,
}

impl ConvergeArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.verbose);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let summary = runtime.block_on(self.converge())?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to serialize converge JSON")?
            );
        } else {
            print_summary(&summary);
        }

        if !summary.converged {
            bail!(
                "workshop '{}' did not converge within {} ticks",
                summary.workshop,
                self.max_ticks
            );
        }
        Ok(())
    }

    async fn converge(&self) -> Result<ConvergeSummary> {
        let doc = load_document(&self.file)?;
        let manifests = Arc::new(load_manifests(self.templates.as_deref())?);
        let simulation = Simulation::openshift().with_rollout_delay(Duration::from_millis(self.rollout_ms));
        let store = MemoryStore::simulated(simulation);
        let transport = Arc::new(RecordingTransport::default());

        upsert_workshop(&store, &doc)
            .await
            .context("failed to seed the simulated cluster")?;

        let config = ConvergeConfig {
            tick_budget_secs: self.tick_budget_secs,
            ..ConvergeConfig::default()
        };
        let engine = Orchestrator::new(Arc::new(store), manifests, transport.clone(), config);
        let target = Orchestrator::workshop_ref(&doc.metadata.name, doc.metadata.namespace.as_deref());

        let mut summary = ConvergeSummary {
            workshop: doc.metadata.name.clone(),
            converged: false,
            ticks: vec![],
            remote_calls: 0,
        };
        for tick in 1..=self.max_ticks {
            let record = match engine.reconcile(&target).await {
                Ok(outcome) => {
                    let converged = outcome.is_converged();
                    let record = TickRecord {
                        tick,
                        outcome: outcome.label().to_string(),
                        reason: match &outcome {
                            ReconcileOutcome::Requeue(signal, _) => Some(signal.to_string()),
                            _ => None,
                        },
                        report: outcome.report().cloned(),
                        component: None,
                        error: None,
                    };
                    if !self.json {
                        print_tick(&record);
                    }
                    summary.ticks.push(record);
                    if converged {
                        summary.converged = true;
                        break;
                    }
                    continue;
                }
                Err(err) => TickRecord {
                    tick,
                    outcome: "failed".to_string(),
                    report: None,
                    reason: None,
                    component: failed_component(&err),
                    error: Some(err.to_string()),
                },
            };
            if !self.json {
                print_tick(&record);
            }
            summary.ticks.push(record);
            break;
        }
        summary.remote_calls = transport.requests().len();
        Ok(summary)
    }
}

fn failed_component(err: &ConvergeError) -> Option<Component> {
    match err {
        ConvergeError::Component { component, .. } => Some(*component),
        _ => None,
    }
}

fn print_tick(record: &TickRecord) {
    println!("{}", format!("tick {}", record.tick).bold());
    if let Some(report) = &record.report {
        for entry in &report.components {
            match &entry.outcome {
                ComponentOutcome::Installed => println!("  {} {}", "✓".green().bold(), entry.component),
                ComponentOutcome::Skipped => {
                    println!("  {} {}", "·".bright_black(), entry.component.to_string().bright_black())
                }
                ComponentOutcome::Requeued { reason } => {
                    println!("  {} {} {}", "~".yellow().bold(), entry.component, reason.yellow())
                }
            }
        }
    }
    if let Some(error) = &record.error {
        println!("  {} {}", "✗".red().bold(), error.red());
    }
}

fn print_summary(summary: &ConvergeSummary) {
    let ticks = summary.ticks.len();
    if summary.converged {
        println!(
            "{} workshop '{}' converged after {ticks} tick(s), {} remote call(s)",
            "✓".green().bold(),
            summary.workshop,
            summary.remote_calls
        );
    } else {
        println!(
            "{} workshop '{}' not converged after {ticks} tick(s)",
            "✗".red().bold(),
            summary.workshop
        );
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if verbose { "debug" } else { "info" };
    let filter = if verbose {
        EnvFilter::new(fallback)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
