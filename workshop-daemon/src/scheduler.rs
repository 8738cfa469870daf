//! Per-tenant reconcile scheduling.
//!
//! One task owns the tenant table. A tenant has at most one reconcile in
//! flight; requests that arrive meanwhile mark it dirty and it runs again as
//! soon as the current tick returns. Distinct tenants run concurrently.
//!
//! Tenants are keyed by [`tenant_key`]: the Workshop name, prefixed with
//! `namespace/` when the document is namespaced.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};

use workshop_converge::store::get_opt;
use workshop_converge::{ObjectStore, Orchestrator, ReconcileOutcome};
use workshop_core::{Component, ObjectRef, Workshop};

use crate::error::DaemonError;

const QUEUE_DEPTH: usize = 256;

/// Snapshot of one tenant, as reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantState {
    pub name: String,
    pub in_flight: bool,
    #[serde(skip)]
    dirty: bool,
    pub last_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub installed: Vec<Component>,
}

impl TenantState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// `true` when a reconcile should start now.
    fn request(&mut self) -> bool {
        if self.in_flight {
            self.dirty = true;
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// Record a finished tick. `installed` is read back from the stored
    /// document; `None` keeps the previous list. `true` when a follow-up
    /// should start at once.
    fn complete(&mut self, result: &TickResult, installed: Option<Vec<Component>>) -> bool {
        self.last_reconcile_at = Some(Utc::now());
        if let Some(installed) = installed {
            self.installed = installed;
        }
        match result {
            Ok(outcome) => {
                self.last_outcome = Some(outcome.label().to_string());
                self.last_error = None;
            }
            Err(err) => {
                self.last_outcome = Some("failed".to_string());
                self.last_error = Some(err.clone());
            }
        }
        if self.dirty {
            self.dirty = false;
            true
        } else {
            self.in_flight = false;
            false
        }
    }
}

pub type TenantTable = Arc<RwLock<BTreeMap<String, TenantState>>>;

/// Scheduler key of the Workshop at `target`.
pub fn tenant_key(target: &ObjectRef) -> String {
    match &target.namespace {
        Some(namespace) => format!("{namespace}/{}", target.name),
        None => target.name.clone(),
    }
}

/// Inverse of [`tenant_key`].
pub fn tenant_ref(key: &str) -> ObjectRef {
    match key.split_once('/') {
        Some((namespace, name)) => Orchestrator::workshop_ref(name, Some(namespace)),
        None => Orchestrator::workshop_ref(key, None),
    }
}

/// Components the document records as installed and still enables.
pub fn installed_components(doc: &Workshop) -> Vec<Component> {
    doc.status
        .installed()
        .into_iter()
        .filter(|component| component.is_enabled(&doc.spec))
        .collect()
}

async fn read_installed(store: &dyn ObjectStore, target: &ObjectRef) -> Option<Vec<Component>> {
    match get_opt(store, target).await {
        Ok(Some(resource)) => Workshop::from_resource(&resource)
            .map(|doc| installed_components(&doc))
            .ok(),
        Ok(None) => Some(vec![]),
        Err(err) => {
            tracing::debug!(workshop = %target.name, error = %err, "could not read back installed components");
            None
        }
    }
}

type TickResult = Result<ReconcileOutcome, String>;

#[derive(Debug)]
enum Message {
    Enqueue { workshop: String, source: &'static str },
    Finished {
        workshop: String,
        result: TickResult,
        installed: Option<Vec<Component>>,
    },
}

/// Cheap handle for queueing reconciles.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Message>,
}

impl SchedulerHandle {
    pub async fn enqueue(&self, workshop: &str, source: &'static str) -> Result<(), DaemonError> {
        self.tx
            .send(Message::Enqueue {
                workshop: workshop.to_string(),
                source,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler queue"))
    }
}

/// Delay before the next tick a finished one asks for. `None` when the
/// tenant is converged or gone; only a change or a resync wakes it again.
pub fn next_delay(result: &TickResult, min_requeue: Duration, error_retry: Duration) -> Option<Duration> {
    match result {
        Ok(ReconcileOutcome::Requeue(signal, _)) => Some(signal.after.unwrap_or(min_requeue).max(min_requeue)),
        Ok(_) => None,
        Err(_) => Some(error_retry.max(min_requeue)),
    }
}

pub struct Scheduler {
    engine: Arc<Orchestrator>,
    tenants: TenantTable,
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    min_requeue: Duration,
    error_retry: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<Orchestrator>, min_requeue: Duration) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let error_retry = engine.config().not_ready_requeue();
        Self {
            engine,
            tenants: Arc::new(RwLock::new(BTreeMap::new())),
            tx,
            rx,
            min_requeue,
            error_retry,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { tx: self.tx.clone() }
    }

    pub fn tenants(&self) -> TenantTable {
        self.tenants.clone()
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                message = self.rx.recv() => {
                    let Some(message) = message else { break };
                    match message {
                        Message::Enqueue { workshop, source } => self.on_enqueue(workshop, source).await,
                        Message::Finished { workshop, result, installed } => {
                            self.on_finished(workshop, result, installed).await
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_enqueue(&self, workshop: String, source: &'static str) {
        let start = {
            let mut tenants = self.tenants.write().await;
            tenants
                .entry(workshop.clone())
                .or_insert_with(|| TenantState::new(&workshop))
                .request()
        };
        if start {
            tracing::debug!(workshop = %workshop, source, "starting reconcile");
            self.spawn_tick(workshop);
        } else {
            tracing::debug!(workshop = %workshop, source, "reconcile in flight, marked dirty");
        }
    }

    async fn on_finished(&self, workshop: String, result: TickResult, installed: Option<Vec<Component>>) {
        match &result {
            Ok(outcome) => tracing::info!(workshop = %workshop, outcome = outcome.label(), "reconcile finished"),
            Err(err) => tracing::error!(workshop = %workshop, error = %err, "reconcile failed"),
        }

        let rerun = {
            let mut tenants = self.tenants.write().await;
            let rerun = tenants.get_mut(&workshop).is_some_and(|t| t.complete(&result, installed));
            if matches!(result, Ok(ReconcileOutcome::Gone) | Ok(ReconcileOutcome::Finalized)) && !rerun {
                tenants.remove(&workshop);
            }
            rerun
        };
        if rerun {
            self.spawn_tick(workshop);
            return;
        }
        if let Some(delay) = next_delay(&result, self.min_requeue, self.error_retry) {
            self.requeue_after(workshop, delay);
        }
    }

    fn spawn_tick(&self, workshop: String) {
        let engine = self.engine.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let target = tenant_ref(&workshop);
            let result = engine.reconcile(&target).await.map_err(|err| err.to_string());
            let installed = read_installed(engine.store().as_ref(), &target).await;
            let _ = tx
                .send(Message::Finished {
                    workshop,
                    result,
                    installed,
                })
                .await;
        });
    }

    fn requeue_after(&self, workshop: String, delay: Duration) {
        let tx = self.tx.clone();
        tracing::debug!(workshop = %workshop, delay_secs = delay.as_secs(), "requeue scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(Message::Enqueue {
                    workshop,
                    source: "requeue",
                })
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workshop_converge::{RequeueSignal, TickReport};
    use workshop_core::document::sample_document;
    use workshop_core::ComponentStatus;

    fn report() -> TickReport {
        TickReport {
            workshop: "ocp-dev".into(),
            components: vec![],
            elapsed_ms: 0,
        }
    }

    #[test]
    fn second_request_while_in_flight_marks_dirty() {
        let mut tenant = TenantState::new("ocp-dev");
        assert!(tenant.request());
        assert!(!tenant.request());
        assert!(!tenant.request());

        // One follow-up covers every request that arrived during the tick.
        assert!(tenant.complete(&Ok(ReconcileOutcome::Converged(report())), None));
        assert!(tenant.in_flight);
        assert!(!tenant.complete(&Ok(ReconcileOutcome::Converged(report())), None));
        assert!(!tenant.in_flight);
        assert_eq!(tenant.last_outcome.as_deref(), Some("converged"));
    }

    #[test]
    fn failure_is_recorded_and_cleared_by_success() {
        let mut tenant = TenantState::new("ocp-dev");
        tenant.request();
        tenant.complete(&Err("gitea installer failed: HTTP 500".into()), None);
        assert_eq!(tenant.last_outcome.as_deref(), Some("failed"));
        assert!(tenant.last_error.is_some());

        tenant.request();
        tenant.complete(&Ok(ReconcileOutcome::Converged(report())), None);
        assert!(tenant.last_error.is_none());
    }

    #[test]
    fn installed_list_follows_the_stored_document() {
        let mut doc = sample_document("ocp-dev", 1);
        doc.spec.infrastructure.gitea.enabled = true;
        for component in [Component::Portal, Component::Project, Component::Gitea] {
            doc.status.set(component, ComponentStatus::Installed);
        }
        let mut tenant = TenantState::new("ocp-dev");
        tenant.request();
        tenant.complete(&Ok(ReconcileOutcome::Converged(report())), Some(installed_components(&doc)));
        assert_eq!(tenant.installed, [Component::Portal, Component::Project, Component::Gitea]);

        // Disabling gitea drops it even though its status still says Installed.
        doc.spec.infrastructure.gitea.enabled = false;
        tenant.request();
        tenant.complete(&Ok(ReconcileOutcome::Converged(report())), Some(installed_components(&doc)));
        assert_eq!(tenant.installed, [Component::Portal, Component::Project]);

        // An unreadable document keeps what was last known.
        tenant.request();
        tenant.complete(&Err("store unavailable".into()), None);
        assert_eq!(tenant.installed, [Component::Portal, Component::Project]);
    }

    #[test]
    fn tenant_keys_carry_the_namespace() {
        let cluster = Orchestrator::workshop_ref("ocp-dev", None);
        let namespaced = Orchestrator::workshop_ref("ocp-dev", Some("workshop"));
        assert_eq!(tenant_key(&cluster), "ocp-dev");
        assert_eq!(tenant_key(&namespaced), "workshop/ocp-dev");
        assert_eq!(tenant_ref("ocp-dev"), cluster);
        assert_eq!(tenant_ref("workshop/ocp-dev"), namespaced);
    }

    #[test]
    fn requeue_delay_respects_floor() {
        let min = Duration::from_secs(1);
        let retry = Duration::from_secs(5);
        let quick = RequeueSignal::after(Duration::ZERO, "plan pending");
        assert_eq!(next_delay(&Ok(ReconcileOutcome::Requeue(quick, report())), min, retry), Some(min));

        let slow = RequeueSignal::after(Duration::from_secs(30), "rollout");
        assert_eq!(
            next_delay(&Ok(ReconcileOutcome::Requeue(slow, report())), min, retry),
            Some(Duration::from_secs(30))
        );
        assert_eq!(next_delay(&Err("boom".into()), min, retry), Some(retry));
        assert_eq!(next_delay(&Ok(ReconcileOutcome::Converged(report())), min, retry), None);
        assert_eq!(next_delay(&Ok(ReconcileOutcome::Gone), min, retry), None);
    }
}
