//! The reconcile tick: walk the installers in dependency order, stop at the
//! first component that is not converged, and project status as each one
//! finishes.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use workshop_core::types::{API_VERSION, KIND};
use workshop_core::{Component, ComponentStatus, ObjectRef, RoutingContext, Workshop};
use workshop_manifests::Manifests;

use crate::config::ConvergeConfig;
use crate::error::{ConvergeError, StoreError};
use crate::installer::{Installer, TickContext};
use crate::installers::default_installers;
use crate::remote::RemoteTransport;
use crate::status;
use crate::step::{Progress, RequeueSignal};
use crate::store::{get_opt, ObjectStore};

pub const FINALIZER: &str = "finalizer.workshop.mcouliba.com";

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ComponentOutcome {
    Skipped,
    Installed,
    Requeued { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
    pub component: Component,
    #[serde(flatten)]
    pub outcome: ComponentOutcome,
}

/// What one tick did, component by component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub workshop: String,
    pub components: Vec<ComponentReport>,
    pub elapsed_ms: u64,
}

impl TickReport {
    fn new(workshop: &str) -> Self {
        Self {
            workshop: workshop.to_string(),
            components: vec![],
            elapsed_ms: 0,
        }
    }

    fn record(&mut self, component: Component, outcome: ComponentOutcome) {
        self.components.push(ComponentReport { component, outcome });
    }

    pub fn outcome(&self, component: Component) -> Option<&ComponentOutcome> {
        self.components
            .iter()
            .find(|r| r.component == component)
            .map(|r| &r.outcome)
    }

    pub fn installed(&self) -> Vec<Component> {
        self.components
            .iter()
            .filter(|r| r.outcome == ComponentOutcome::Installed)
            .map(|r| r.component)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every enabled component converged this tick.
    Converged(TickReport),
    Requeue(RequeueSignal, TickReport),
    /// The document no longer exists.
    Gone,
    /// The document was being deleted and our finalizer has been released.
    Finalized,
}

impl ReconcileOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            ReconcileOutcome::Converged(report) | ReconcileOutcome::Requeue(_, report) => Some(report),
            _ => None,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, ReconcileOutcome::Converged(_))
    }

    /// Short label for logs and the daemon's status table.
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Converged(_) => "converged",
            ReconcileOutcome::Requeue(..) => "requeued",
            ReconcileOutcome::Gone => "gone",
            ReconcileOutcome::Finalized => "finalized",
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    installers: Vec<Box<dyn Installer>>,
    manifests: Arc<Manifests>,
    transport: Arc<dyn RemoteTransport>,
    config: ConvergeConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        manifests: Arc<Manifests>,
        transport: Arc<dyn RemoteTransport>,
        config: ConvergeConfig,
    ) -> Self {
        Self {
            store,
            installers: default_installers(),
            manifests,
            transport,
            config,
        }
    }

    /// Replace the installer set. Installers run in [`Component::ORDER`]
    /// regardless of the order given here.
    pub fn with_installers(mut self, mut installers: Vec<Box<dyn Installer>>) -> Self {
        installers.sort_by_key(|i| order_index(i.component()));
        self.installers = installers;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    /// Reference of the Workshop document called `name`, in `namespace`
    /// when the document is namespaced.
    pub fn workshop_ref(name: &str, namespace: Option<&str>) -> ObjectRef {
        match namespace {
            Some(namespace) => ObjectRef::namespaced(API_VERSION, KIND, namespace, name),
            None => ObjectRef::cluster(API_VERSION, KIND, name),
        }
    }

    /// One tick for the Workshop at `target`.
    pub async fn reconcile(&self, target: &ObjectRef) -> Result<ReconcileOutcome, ConvergeError> {
        let started = Instant::now();
        let store = self.store.as_ref();

        let Some(resource) = get_opt(store, target).await? else {
            tracing::debug!(workshop = %target.name, "workshop no longer exists");
            return Ok(ReconcileOutcome::Gone);
        };
        let mut workshop = Workshop::from_resource(&resource)?;

        if resource.is_deleting() {
            return self.finalize(workshop).await;
        }
        if !workshop.metadata.finalizers.iter().any(|f| f == FINALIZER) {
            workshop.metadata.finalizers.push(FINALIZER.to_string());
            let stored = store.update(workshop.to_resource()?).await?;
            workshop = Workshop::from_resource(&stored)?;
            tracing::debug!(workshop = %target.name, "finalizer added");
        }

        let owner = workshop.owner_reference().ok_or_else(|| ConvergeError::MissingField {
            target: target.clone(),
            field: "metadata.uid".to_string(),
        })?;
        let routing = self.routing().await?;
        let deadline = self.config.tick_budget().map(|budget| started + budget);

        let mut report = TickReport::new(&workshop.metadata.name);
        for installer in &self.installers {
            let component = installer.component();
            if !component.is_enabled(&workshop.spec) {
                report.record(component, ComponentOutcome::Skipped);
                continue;
            }

            let ctx = TickContext {
                workshop: &workshop,
                store,
                owner: &owner,
                routing: &routing,
                config: &self.config,
                transport: self.transport.as_ref(),
                manifests: self.manifests.as_ref(),
                deadline,
            };
            let progress = match installer.install(&ctx).await {
                Ok(progress) => progress,
                Err(err) if err.is_not_ready() => Progress::Requeue(RequeueSignal::after(
                    self.config.not_ready_requeue(),
                    err.to_string(),
                )),
                Err(err) => {
                    return Err(ConvergeError::Component {
                        component,
                        source: Box::new(err),
                    })
                }
            };

            match progress {
                Progress::Done => {
                    status::project(store, target, component, ComponentStatus::Installed).await?;
                    report.record(component, ComponentOutcome::Installed);
                }
                Progress::Requeue(signal) => {
                    let signal = signal.for_component(component);
                    report.record(
                        component,
                        ComponentOutcome::Requeued {
                            reason: signal.reason.clone(),
                        },
                    );
                    report.elapsed_ms = elapsed_ms(started);
                    tracing::info!(workshop = %target.name, component = %component, "{signal}");
                    return Ok(ReconcileOutcome::Requeue(signal, report));
                }
            }
        }

        report.elapsed_ms = elapsed_ms(started);
        tracing::info!(
            workshop = %target.name,
            installed = report.installed().len(),
            elapsed_ms = report.elapsed_ms,
            "workshop converged"
        );
        Ok(ReconcileOutcome::Converged(report))
    }

    async fn routing(&self) -> Result<RoutingContext, ConvergeError> {
        let console = RoutingContext::console_route_ref();
        let route = match self.store.get(&console).await {
            Ok(route) => route,
            Err(StoreError::NotFound(_)) => {
                return Err(ConvergeError::InvalidConfig(format!(
                    "console route {console} not found; cannot derive the apps domain"
                )))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(RoutingContext::from_console_route(&route)?)
    }

    /// Cascade deletion removes everything we own; all that is left is to
    /// release the finalizer.
    async fn finalize(&self, mut workshop: Workshop) -> Result<ReconcileOutcome, ConvergeError> {
        let before = workshop.metadata.finalizers.len();
        workshop.metadata.finalizers.retain(|f| f != FINALIZER);
        if workshop.metadata.finalizers.len() == before {
            return Ok(ReconcileOutcome::Gone);
        }
        tracing::info!(workshop = %workshop.metadata.name, "finalizing workshop");
        match self.store.update(workshop.to_resource()?).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(ReconcileOutcome::Finalized),
            Err(err) => Err(err.into()),
        }
    }
}

fn order_index(component: Component) -> usize {
    Component::ORDER
        .iter()
        .position(|c| *c == component)
        .unwrap_or(usize::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_flat_outcomes() {
        let mut report = TickReport::new("ocp-dev");
        report.record(Component::Portal, ComponentOutcome::Installed);
        report.record(
            Component::Project,
            ComponentOutcome::Requeued {
                reason: "Namespace/cn-project1 not visible yet".into(),
            },
        );
        let value = serde_json::to_value(&report).expect("encode");
        assert_eq!(value["components"][0]["component"], "portal");
        assert_eq!(value["components"][0]["outcome"], "installed");
        assert_eq!(value["components"][1]["outcome"], "requeued");
        assert_eq!(
            value["components"][1]["reason"],
            "Namespace/cn-project1 not visible yet"
        );
        assert_eq!(report.installed(), vec![Component::Portal]);
    }

    #[test]
    fn workshop_ref_carries_the_namespace() {
        let target = Orchestrator::workshop_ref("ocp-dev", None);
        assert_eq!(target.kind, KIND);
        assert!(target.namespace.is_none());
        let target = Orchestrator::workshop_ref("ocp-dev", Some("workshop"));
        assert_eq!(target.namespace.as_deref(), Some("workshop"));
        assert_eq!(target.name, "ocp-dev");
    }
}
