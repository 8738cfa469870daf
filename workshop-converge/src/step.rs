//! Declarative install steps and the executor that runs them in order.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use workshop_core::{Component, ManagedResource, ObjectRef};

use crate::applier::{ApplyOutcome, OwnedFields};
use crate::error::ConvergeError;
use crate::gate::GateResult;
use crate::installer::TickContext;
use crate::installplan::approve_if_needed;
use crate::remote::{run_remote, RemoteCall};
use crate::store::{get_opt, ObjectStore};

// ---------------------------------------------------------------------------
// Requeue
// ---------------------------------------------------------------------------

/// "Stop this tick and reconcile again later." Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequeueSignal {
    pub after: Option<Duration>,
    pub component: Option<Component>,
    pub reason: String,
}

impl RequeueSignal {
    pub fn after(delay: Duration, reason: impl Into<String>) -> Self {
        Self {
            after: Some(delay),
            component: None,
            reason: reason.into(),
        }
    }

    pub fn for_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }
}

impl fmt::Display for RequeueSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(component) = self.component {
            write!(f, "{component}: ")?;
        }
        f.write_str(&self.reason)?;
        if let Some(after) = self.after {
            write!(f, " (retry in {}s)", after.as_secs())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Done,
    Requeue(RequeueSignal),
}

// ---------------------------------------------------------------------------
// Prune
// ---------------------------------------------------------------------------

const INDEX: &str = "{i}";

/// An [`ObjectRef`] whose name and namespace may contain `{i}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl IndexedRef {
    pub fn namespaced(api_version: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    pub fn cluster(api_version: &str, kind: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: None,
        }
    }

    pub fn resolve(&self, index: usize) -> ObjectRef {
        let fill = |pattern: &str| pattern.replace(INDEX, &index.to_string());
        ObjectRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: fill(&self.name),
            namespace: self.namespace.as_deref().map(fill),
        }
    }

    /// The index `target` was resolved from, if it matches this pattern.
    pub fn index_of(&self, target: &ObjectRef) -> Option<usize> {
        let (prefix, suffix) = self.name.split_once(INDEX)?;
        let digits = target.name.strip_prefix(prefix)?.strip_suffix(suffix)?;
        let index = digits.parse().ok()?;
        (self.resolve(index) == *target).then_some(index)
    }
}

/// Delete per-user resources above the user count. Every index from `start`
/// up whose marker object exists has its targets deleted, then the marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneSpec {
    pub start: usize,
    pub marker: IndexedRef,
    pub targets: Vec<IndexedRef>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

pub enum Step {
    Apply(ManagedResource),
    ApplyWithUpdate(ManagedResource, OwnedFields),
    AwaitReady { target: ObjectRef, replicas: i64 },
    ApproveInstallPlan { subscription: ObjectRef, version: String },
    /// Append `value` to the string array at `pointer` of an existing object.
    EnsureListMember { target: ObjectRef, pointer: String, value: String },
    Remote(Box<dyn RemoteCall>),
    Delete(ObjectRef),
    Prune(PruneSpec),
}

impl Step {
    pub fn await_rollout(target: ObjectRef) -> Self {
        Step::AwaitReady { target, replicas: 1 }
    }

    pub fn approve(subscription: ObjectRef, version: impl Into<String>) -> Self {
        Step::ApproveInstallPlan {
            subscription,
            version: version.into(),
        }
    }

    /// The resource this step would create or update, if any.
    pub fn resource(&self) -> Option<&ManagedResource> {
        match self {
            Step::Apply(res) | Step::ApplyWithUpdate(res, _) => Some(res),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Step::Apply(res) => format!("apply {}", res.object_ref()),
            Step::ApplyWithUpdate(res, fields) => format!(
                "apply {} (update on drift: {})",
                res.object_ref(),
                fields.pointers().collect::<Vec<_>>().join(", ")
            ),
            Step::AwaitReady { target, replicas } => {
                format!("await {target} ready >= {replicas}")
            }
            Step::ApproveInstallPlan { subscription, version } if version.is_empty() => {
                format!("approve install plan of {subscription} (latest)")
            }
            Step::ApproveInstallPlan { subscription, version } => {
                format!("approve install plan of {subscription} at {version}")
            }
            Step::EnsureListMember { target, pointer, value } => {
                format!("ensure {value} in {target}{pointer}")
            }
            Step::Remote(call) => format!("remote {}", call.describe()),
            Step::Delete(target) => format!("delete {target}"),
            Step::Prune(spec) => format!(
                "prune {} from index {}",
                spec.marker.resolve(spec.start).kind,
                spec.start
            ),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Run `steps` strictly in order. The first gate that is not yet satisfied,
/// or any `NotReady` condition, ends the run with a requeue.
pub async fn execute(steps: &[Step], ctx: &TickContext<'_>) -> Result<Progress, ConvergeError> {
    let requeue = |reason: String| -> Result<Progress, ConvergeError> {
        Ok(Progress::Requeue(RequeueSignal::after(
            ctx.config.not_ready_requeue(),
            reason,
        )))
    };

    for step in steps {
        match run_step(step, ctx).await {
            Ok(None) => {}
            Ok(Some(reason)) => {
                tracing::info!(workshop = %ctx.workshop.metadata.name, step = %step.describe(), "{reason}");
                return requeue(reason);
            }
            Err(err) if err.is_not_ready() => {
                tracing::info!(workshop = %ctx.workshop.metadata.name, step = %step.describe(), "{err}");
                return requeue(err.to_string());
            }
            Err(err) => return Err(err),
        }
    }
    Ok(Progress::Done)
}

/// `Ok(Some(reason))` means the step is waiting.
async fn run_step(step: &Step, ctx: &TickContext<'_>) -> Result<Option<String>, ConvergeError> {
    match step {
        Step::Apply(res) => {
            ctx.applier().apply(res.clone()).await?;
        }
        Step::ApplyWithUpdate(res, fields) => {
            let outcome: ApplyOutcome = ctx.applier().apply_owned(res.clone(), fields).await?;
            tracing::trace!(target_ref = %res.object_ref(), ?outcome, "applied");
        }
        Step::AwaitReady { target, replicas } => match ctx.gate().await_ready(ctx.store, target, *replicas).await {
            GateResult::Satisfied => {}
            GateResult::NotYetSatisfied => return Ok(Some(format!("{target} not ready yet"))),
            GateResult::TimedOut => return Ok(Some(format!("{target} did not become ready in time"))),
            GateResult::Failed(reason) => {
                return Err(ConvergeError::GateFailed {
                    target: target.clone(),
                    reason,
                })
            }
        },
        Step::ApproveInstallPlan { subscription, version } => {
            approve_if_needed(ctx.store, subscription, version).await?;
        }
        Step::EnsureListMember { target, pointer, value } => {
            ensure_list_member(ctx.store, target, pointer, value).await?;
        }
        Step::Remote(call) => run_remote(call.as_ref(), ctx).await?,
        Step::Delete(target) => {
            delete_once(ctx.store, target).await?;
        }
        Step::Prune(spec) => prune(ctx.store, spec).await?,
    }
    Ok(None)
}

async fn ensure_list_member(
    store: &dyn ObjectStore,
    target: &ObjectRef,
    pointer: &str,
    value: &str,
) -> Result<(), ConvergeError> {
    let mut obj = get_opt(store, target)
        .await?
        .ok_or_else(|| ConvergeError::not_ready(format!("{target} not visible yet")))?;
    let mut members: Vec<Value> = match obj.pointer(pointer) {
        Some(Value::Array(items)) => items.clone(),
        _ => vec![],
    };
    if members.iter().any(|m| m.as_str() == Some(value)) {
        return Ok(());
    }
    members.push(Value::String(value.to_string()));
    obj.set_pointer(pointer, Value::Array(members));
    store.update(obj).await?;
    tracing::info!(target_ref = %target, member = value, "added list member");
    Ok(())
}

/// Delete unless absent or already terminating. Returns whether a delete
/// was issued.
async fn delete_once(store: &dyn ObjectStore, target: &ObjectRef) -> Result<bool, ConvergeError> {
    match get_opt(store, target).await? {
        Some(obj) if !obj.is_deleting() => {
            crate::store::delete_if_present(store, target).await?;
            tracing::info!(kind = %target.kind, name = %target.name, namespace = ?target.namespace, "deleted");
            Ok(true)
        }
        _ => Ok(false),
    }
}

async fn prune(store: &dyn ObjectStore, spec: &PruneSpec) -> Result<(), ConvergeError> {
    // Listed rather than checked index by index: an interrupted prune can
    // leave a gap below indices that still exist.
    let marker = &spec.marker;
    let scope = marker.namespace.as_deref().filter(|ns| !ns.contains(INDEX));
    let mut indices: Vec<usize> = store
        .list(&marker.api_version, &marker.kind, scope)
        .await?
        .iter()
        .filter_map(|obj| marker.index_of(&obj.object_ref()))
        .filter(|index| *index >= spec.start)
        .collect();
    indices.sort_unstable();
    indices.dedup();

    for index in indices {
        for target in &spec.targets {
            delete_once(store, &target.resolve(index)).await?;
        }
        delete_once(store, &marker.resolve(index)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn indexed_ref_fills_name_and_namespace() {
        let pattern = IndexedRef::namespaced(
            "rbac.authorization.k8s.io/v1",
            "RoleBinding",
            "user{i}-project",
            "user{i}-default",
        );
        let resolved = pattern.resolve(3);
        assert_eq!(resolved.name, "user3-default");
        assert_eq!(resolved.namespace.as_deref(), Some("user3-project"));
    }

    #[test]
    fn index_of_inverts_resolve() {
        let pattern = IndexedRef::cluster("v1", "Namespace", "cn-project{i}");
        assert_eq!(pattern.index_of(&ObjectRef::namespace("cn-project12")), Some(12));
        assert_eq!(pattern.index_of(&ObjectRef::namespace("cn-project")), None);
        assert_eq!(pattern.index_of(&ObjectRef::namespace("cn-project02")), None);
        assert_eq!(pattern.index_of(&ObjectRef::namespace("cn-projectx")), None);
        assert_eq!(pattern.index_of(&ObjectRef::namespace("gitea")), None);

        let bookbag = IndexedRef::namespaced("apps/v1", "Deployment", "workshop-guides", "user{i}-bookbag");
        let other_ns = ObjectRef::namespaced("apps/v1", "Deployment", "default", "user3-bookbag");
        assert_eq!(bookbag.index_of(&bookbag.resolve(3)), Some(3));
        assert_eq!(bookbag.index_of(&other_ns), None);
    }

    #[tokio::test]
    async fn prune_skips_gaps_and_keeps_lower_indices() {
        let store = MemoryStore::new();
        for name in ["cn-project1", "cn-project3", "cn-project5", "gitea"] {
            store
                .create(ManagedResource::new("v1", "Namespace", name, None))
                .await
                .expect("create");
        }
        let spec = PruneSpec {
            start: 2,
            marker: IndexedRef::cluster("v1", "Namespace", "cn-project{i}"),
            targets: vec![],
        };
        prune(&store, &spec).await.expect("prune");

        let mut left: Vec<String> = store
            .objects_of_kind("Namespace")
            .into_iter()
            .map(|ns| ns.name().to_string())
            .collect();
        left.sort();
        assert_eq!(left, ["cn-project1", "gitea"]);
        assert_eq!(store.counts("Namespace").deletes, 2);
    }

    #[test]
    fn describe_is_one_line() {
        let step = Step::approve(
            ObjectRef::namespaced(
                "operators.coreos.com/v1alpha1",
                "Subscription",
                "openshift-operators",
                "serverless-operator",
            ),
            "",
        );
        assert_eq!(
            step.describe(),
            "approve install plan of Subscription/openshift-operators/serverless-operator (latest)"
        );
        let prune = Step::Prune(PruneSpec {
            start: 2,
            marker: IndexedRef::cluster("v1", "Namespace", "user{i}-project"),
            targets: vec![],
        });
        assert_eq!(prune.describe(), "prune Namespace from index 2");
    }

    #[test]
    fn requeue_signal_display() {
        let signal = RequeueSignal::after(Duration::from_secs(5), "plan pending")
            .for_component(Component::Pipeline);
        assert_eq!(signal.to_string(), "pipeline: plan pending (retry in 5s)");
    }
}
