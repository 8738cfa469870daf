//! # workshop-converge
//!
//! The convergence engine for Workshop tenants.
//!
//! [`Orchestrator::reconcile`] runs one tick: every enabled component
//! installer in dependency order, each a declarative list of [`Step`]s
//! executed against an [`ObjectStore`]. Writes go through the idempotent
//! [`Applier`], waits go through the [`ReadinessGate`] and the install-plan
//! gate, and the first component that is not yet converged ends the tick
//! with a [`RequeueSignal`].

pub mod applier;
pub mod config;
pub mod drift;
pub mod error;
pub mod gate;
pub mod installer;
pub mod installers;
pub mod installplan;
pub mod memory;
pub mod orchestrator;
pub mod plan;
pub mod remote;
pub mod simulation;
pub mod status;
pub mod step;
pub mod store;

pub use applier::{ApplyOutcome, Applier, OwnedFields};
pub use config::ConvergeConfig;
pub use error::{ConvergeError, StoreError};
pub use gate::{GateResult, ReadinessGate};
pub use installer::{Installer, PlanContext, TickContext};
pub use installers::default_installers;
pub use installplan::{approve_if_needed, InstallPlanOutcome};
pub use memory::MemoryStore;
pub use orchestrator::{
    ComponentOutcome, ComponentReport, Orchestrator, ReconcileOutcome, TickReport, FINALIZER,
};
pub use plan::{describe_plan, diff_documents, ChangeKind, ComponentPlan, ResourceDiff};
pub use remote::{HttpTransport, RecordingTransport, RemoteCall, RemoteRequest, RemoteTransport};
pub use simulation::Simulation;
pub use step::{Progress, RequeueSignal, Step};
pub use store::{ObjectStore, WatchEvent};
