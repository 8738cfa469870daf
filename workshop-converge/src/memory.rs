//! In-memory [`ObjectStore`].
//!
//! Models the store semantics the engine depends on: `AlreadyExists` on
//! create, optimistic concurrency on update, finalizer-aware deletion with
//! owner-reference cascade, and per-object watches. With a [`Simulation`]
//! attached it also plays the cluster's controllers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use workshop_core::{ManagedResource, ObjectRef};

use crate::error::StoreError;
use crate::simulation::{is_workload, Simulation, Trigger};
use crate::store::{log_tail, ClusterEvent, ObjectStore, WatchEvent, WATCH_BUFFER};

/// Successful writes per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl CallCounts {
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

struct Watcher {
    target: ObjectRef,
    tx: mpsc::Sender<WatchEvent>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectRef, ManagedResource>,
    version: u64,
    counts: HashMap<String, CallCounts>,
    watchers: Vec<Watcher>,
    events: HashMap<ObjectRef, Vec<ClusterEvent>>,
    logs: HashMap<ObjectRef, String>,
    fail_diagnostics: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn count(&mut self, kind: &str) -> &mut CallCounts {
        self.counts.entry(kind.to_string()).or_default()
    }

    fn notify(&mut self, target: &ObjectRef, event: WatchEvent) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in self.watchers.iter().filter(|w| &w.target == target) {
            if watcher.tx.try_send(event.clone()).is_err() {
                tracing::warn!(target = %target, "watch buffer full, dropping event");
            }
        }
    }

    /// Remove `target` and, transitively, everything it owns.
    fn remove_cascade(&mut self, target: &ObjectRef) {
        let mut pending = vec![target.clone()];
        while let Some(next) = pending.pop() {
            let Some(removed) = self.objects.remove(&next) else {
                continue;
            };
            self.notify(&next, WatchEvent::Deleted(next.clone()));
            if let Some(uid) = removed.metadata.uid.as_deref() {
                pending.extend(
                    self.objects
                        .iter()
                        .filter(|(_, obj)| obj.has_owner(uid))
                        .map(|(key, _)| key.clone()),
                );
            }
        }
    }

    /// Bump the version of a stored object and notify watchers.
    fn touch(&mut self, target: &ObjectRef) {
        let version = self.next_version();
        if let Some(obj) = self.objects.get_mut(target) {
            obj.metadata.resource_version = Some(version);
            let snapshot = obj.clone();
            self.notify(target, WatchEvent::Modified(snapshot));
        }
    }
}

struct Shared {
    state: Mutex<State>,
    simulation: Option<Simulation>,
}

/// Cheap to clone; clones share one store.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Plain store: no controllers, nothing seeded.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                simulation: None,
            }),
        }
    }

    /// Store that behaves like a cluster running `simulation`'s controllers,
    /// seeded with its console route and security constraints.
    pub fn simulated(simulation: Simulation) -> Self {
        let seeds = simulation.seed_objects();
        let store = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                simulation: Some(simulation),
            }),
        };
        for obj in seeds {
            store.seed(obj);
        }
        store
    }

    /// Insert an object as if it predated the tick; not counted as a write.
    pub fn seed(&self, mut obj: ManagedResource) {
        if let Ok(mut state) = self.lock() {
            let version = state.next_version();
            obj.metadata.uid.get_or_insert_with(new_uid);
            obj.metadata.resource_version = Some(version);
            state.objects.insert(obj.object_ref(), obj);
        }
    }

    pub fn counts(&self, kind: &str) -> CallCounts {
        self.lock()
            .ok()
            .and_then(|state| state.counts.get(kind).copied())
            .unwrap_or_default()
    }

    pub fn total_writes(&self) -> usize {
        self.lock()
            .map(|state| state.counts.values().map(CallCounts::writes).sum())
            .unwrap_or(0)
    }

    pub fn contains(&self, target: &ObjectRef) -> bool {
        self.lock()
            .map(|state| state.objects.contains_key(target))
            .unwrap_or(false)
    }

    /// Every stored object of `kind`, in key order.
    pub fn objects_of_kind(&self, kind: &str) -> Vec<ManagedResource> {
        self.lock()
            .map(|state| {
                state
                    .objects
                    .values()
                    .filter(|o| o.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn record_event(&self, target: &ObjectRef, event: ClusterEvent) {
        if let Ok(mut state) = self.lock() {
            state.events.entry(target.clone()).or_default().push(event);
        }
    }

    pub fn set_pod_log(&self, target: &ObjectRef, log: impl Into<String>) {
        if let Ok(mut state) = self.lock() {
            state.logs.insert(target.clone(), log.into());
        }
    }

    /// Make the diagnostics calls fail, to exercise gate error handling.
    pub fn fail_diagnostics(&self, fail: bool) {
        if let Ok(mut state) = self.lock() {
            state.fail_diagnostics = fail;
        }
    }

    /// End every open watch on `target` with a terminal error.
    pub fn break_watches(&self, target: &ObjectRef, reason: &str) {
        if let Ok(mut state) = self.lock() {
            state.notify(target, WatchEvent::Error(reason.to_string()));
            state.watchers.retain(|w| &w.target != target);
        }
    }

    /// Set `status.readyReplicas` directly.
    pub fn set_ready_replicas(&self, target: &ObjectRef, ready: i64) {
        if let Ok(mut state) = self.lock() {
            if let Some(obj) = state.objects.get_mut(target) {
                obj.set_pointer("/status/readyReplicas", json!(ready));
            }
            state.touch(target);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.shared
            .state
            .lock()
            .map_err(|_| StoreError::Transport("memory store lock poisoned".to_string()))
    }

    // -----------------------------------------------------------------------
    // Simulation
    // -----------------------------------------------------------------------

    /// Insert a new object and run the simulated controllers over it.
    /// Returns workloads whose rollout completes after the configured delay.
    fn insert_new(&self, state: &mut State, mut obj: ManagedResource) -> Vec<ObjectRef> {
        let target = obj.object_ref();
        let version = state.next_version();
        obj.metadata.uid = Some(new_uid());
        obj.metadata.resource_version = Some(version);
        obj.metadata.deletion_timestamp = None;

        let mut delayed = Vec::new();
        let sim = self.shared.simulation.as_ref();
        if let Some(sim) = sim {
            if is_workload(&target) {
                if sim.rollout_delay.is_zero() {
                    mark_rolled_out(&mut obj);
                } else {
                    delayed.push(target.clone());
                }
            }
        }

        let owner_uid = obj.metadata.uid.clone();
        state.objects.insert(target.clone(), obj.clone());
        state.notify(&target, WatchEvent::Added(obj.clone()));

        let Some(sim) = sim else {
            return delayed;
        };
        if obj.kind == "Subscription" {
            resolve_subscription(state, &target);
        }
        for mut spawned in sim.spawned_by(&Trigger::created(&obj.kind, obj.name())) {
            if state.objects.contains_key(&spawned.object_ref()) {
                continue;
            }
            if let Some(uid) = owner_uid.clone() {
                spawned.stamp_owner(&workshop_core::OwnerReference {
                    api_version: obj.api_version.clone(),
                    kind: obj.kind.clone(),
                    name: obj.name().to_string(),
                    uid,
                    controller: Some(true),
                    block_owner_deletion: None,
                });
            }
            delayed.extend(self.insert_new(state, spawned));
        }
        delayed
    }

    fn after_update(&self, state: &mut State, previous: &ManagedResource, current: &ManagedResource) -> Vec<ObjectRef> {
        let Some(sim) = self.shared.simulation.as_ref() else {
            return vec![];
        };
        let was_approved = previous.pointer("/spec/approved") == Some(&Value::Bool(true));
        let now_approved = current.pointer("/spec/approved") == Some(&Value::Bool(true));
        if current.kind != "InstallPlan" || was_approved || !now_approved {
            return vec![];
        }

        let mut delayed = Vec::new();
        let plan_ref = current.object_ref();
        if let Some(obj) = state.objects.get_mut(&plan_ref) {
            obj.set_pointer("/status/phase", json!("Complete"));
        }
        for sub_ref in subscriptions_for_plan(state, &plan_ref) {
            if let Some(sub) = state.objects.get_mut(&sub_ref) {
                let current_csv = sub.pointer("/status/currentCSV").cloned().unwrap_or(Value::Null);
                sub.set_pointer("/status/installedCSV", current_csv);
                sub.set_pointer("/status/state", json!("AtLatestKnown"));
            }
            state.touch(&sub_ref);
            tracing::debug!(subscription = %sub_ref, "simulated operator install");
            for spawned in sim.spawned_by(&Trigger::plan_approved(&sub_ref.name)) {
                if !state.objects.contains_key(&spawned.object_ref()) {
                    delayed.extend(self.insert_new(state, spawned));
                }
            }
        }
        delayed
    }

    fn schedule_rollouts(&self, targets: Vec<ObjectRef>) {
        let Some(delay) = self.shared.simulation.as_ref().map(|s| s.rollout_delay) else {
            return;
        };
        for target in targets {
            let store = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Ok(mut state) = store.lock() {
                    if let Some(obj) = state.objects.get_mut(&target) {
                        mark_rolled_out(obj);
                        state.touch(&target);
                    }
                }
            });
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, target: &ObjectRef) -> Result<ManagedResource, StoreError> {
        self.lock()?
            .objects
            .get(target)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target.clone()))
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<ManagedResource>, StoreError> {
        Ok(self
            .lock()?
            .objects
            .iter()
            .filter(|(key, _)| {
                key.api_version == api_version
                    && key.kind == kind
                    && namespace.map_or(true, |ns| key.namespace.as_deref() == Some(ns))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, object: ManagedResource) -> Result<ManagedResource, StoreError> {
        let target = object.object_ref();
        if target.name.is_empty() {
            return Err(StoreError::Rejected {
                target,
                reason: "metadata.name is required".to_string(),
            });
        }
        let (stored, delayed) = {
            let mut state = self.lock()?;
            if state.objects.contains_key(&target) {
                return Err(StoreError::AlreadyExists(target));
            }
            let delayed = self.insert_new(&mut state, object);
            state.count(&target.kind).creates += 1;
            let stored = state
                .objects
                .get(&target)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(target.clone()))?;
            (stored, delayed)
        };
        self.schedule_rollouts(delayed);
        Ok(stored)
    }

    async fn update(&self, mut object: ManagedResource) -> Result<ManagedResource, StoreError> {
        let target = object.object_ref();
        let (stored, delayed) = {
            let mut state = self.lock()?;
            let previous = state
                .objects
                .get(&target)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(target.clone()))?;
            if let Some(version) = object.metadata.resource_version.as_deref() {
                if previous.metadata.resource_version.as_deref() != Some(version) {
                    return Err(StoreError::Conflict(target));
                }
            }

            object.metadata.uid = previous.metadata.uid.clone();
            object.metadata.deletion_timestamp = previous.metadata.deletion_timestamp;
            let version = state.next_version();
            object.metadata.resource_version = Some(version);
            state.count(&target.kind).updates += 1;

            if object.is_deleting() && object.metadata.finalizers.is_empty() {
                state.objects.insert(target.clone(), object.clone());
                state.remove_cascade(&target);
                return Ok(object);
            }

            state.objects.insert(target.clone(), object.clone());
            state.notify(&target, WatchEvent::Modified(object.clone()));
            let delayed = self.after_update(&mut state, &previous, &object);
            let stored = state.objects.get(&target).cloned().unwrap_or(object);
            (stored, delayed)
        };
        self.schedule_rollouts(delayed);
        Ok(stored)
    }

    async fn delete(&self, target: &ObjectRef) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let obj = state
            .objects
            .get_mut(target)
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        if !obj.metadata.finalizers.is_empty() {
            if obj.metadata.deletion_timestamp.is_none() {
                obj.metadata.deletion_timestamp = Some(Utc::now());
                state.touch(target);
            }
        } else {
            state.remove_cascade(target);
        }
        state.count(&target.kind).deletes += 1;
        Ok(())
    }

    async fn watch(&self, target: &ObjectRef) -> Result<mpsc::Receiver<WatchEvent>, StoreError> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let mut state = self.lock()?;
        if let Some(current) = state.objects.get(target) {
            let _ = tx.try_send(WatchEvent::Added(current.clone()));
        }
        state.watchers.push(Watcher {
            target: target.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn recent_events(&self, target: &ObjectRef) -> Result<Vec<ClusterEvent>, StoreError> {
        let state = self.lock()?;
        if state.fail_diagnostics {
            return Err(StoreError::Transport("events unavailable".to_string()));
        }
        Ok(state.events.get(target).cloned().unwrap_or_default())
    }

    async fn pod_log_tail(
        &self,
        target: &ObjectRef,
        max_bytes: usize,
    ) -> Result<Option<String>, StoreError> {
        let state = self.lock()?;
        if state.fail_diagnostics {
            return Err(StoreError::Transport("pod logs unavailable".to_string()));
        }
        Ok(state.logs.get(target).map(|log| log_tail(log, max_bytes).to_string()))
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn mark_rolled_out(obj: &mut ManagedResource) {
    let replicas = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
    obj.set_pointer("/status/replicas", json!(replicas));
    obj.set_pointer("/status/readyReplicas", json!(replicas));
}

/// Catalog resolution: pick a CSV and generate an unapproved install plan.
fn resolve_subscription(state: &mut State, sub_ref: &ObjectRef) {
    let Some(sub) = state.objects.get(sub_ref) else {
        return;
    };
    let package = sub.pointer_str("/spec/name").unwrap_or(sub.name()).to_string();
    let csv = sub
        .pointer_str("/spec/startingCSV")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{package}.latest"));
    let namespace = sub_ref.namespace.clone();
    let plan_name = format!("install-{}", sub_ref.name);

    let mut plan = ManagedResource::new(
        "operators.coreos.com/v1alpha1",
        "InstallPlan",
        plan_name.as_str(),
        namespace.as_deref(),
    );
    plan.set_pointer("/spec/approval", json!("Manual"));
    plan.set_pointer("/spec/approved", json!(false));
    plan.set_pointer("/spec/clusterServiceVersionNames", json!([csv]));
    plan.set_pointer("/status/phase", json!("RequiresApproval"));
    let version = state.next_version();
    plan.metadata.uid = Some(new_uid());
    plan.metadata.resource_version = Some(version);
    let plan_ref = plan.object_ref();
    state.objects.entry(plan_ref).or_insert(plan);

    if let Some(sub) = state.objects.get_mut(sub_ref) {
        sub.set_pointer("/status/currentCSV", json!(csv));
        sub.set_pointer("/status/state", json!("UpgradePending"));
        sub.set_pointer(
            "/status/installPlanRef",
            json!({
                "apiVersion": "operators.coreos.com/v1alpha1",
                "kind": "InstallPlan",
                "name": plan_name,
                "namespace": namespace,
            }),
        );
    }
    state.touch(sub_ref);
}

fn subscriptions_for_plan(state: &State, plan_ref: &ObjectRef) -> Vec<ObjectRef> {
    state
        .objects
        .iter()
        .filter(|(key, sub)| {
            key.kind == "Subscription"
                && key.namespace == plan_ref.namespace
                && sub.pointer_str("/status/installPlanRef/name") == Some(plan_ref.name.as_str())
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Last `max_bytes` of `log`, moved forward to a char boundary.
// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use workshop_core::OwnerReference;

    fn config_map(name: &str) -> ManagedResource {
        ManagedResource::new("v1", "ConfigMap", name, Some("labs"))
    }

    #[tokio::test]
    async fn create_assigns_identity_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let stored = store.create(config_map("a")).await.expect("create");
        assert!(stored.metadata.uid.is_some());
        assert!(stored.metadata.resource_version.is_some());

        let err = store.create(config_map("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.counts("ConfigMap").creates, 1);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let first = store.create(config_map("a")).await.expect("create");
        let mut fresh = first.clone();
        fresh.set_pointer("/data/k", json!("v1"));
        store.update(fresh).await.expect("update");

        let mut stale = first;
        stale.set_pointer("/data/k", json!("v2"));
        let err = store.update(stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_cascades_through_owner_references() {
        let store = MemoryStore::new();
        let owner = store.create(config_map("owner")).await.expect("owner");
        let mut child = config_map("child");
        child.stamp_owner(&OwnerReference {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
            name: "owner".into(),
            uid: owner.metadata.uid.clone().expect("uid"),
            controller: Some(true),
            block_owner_deletion: Some(true),
        });
        let child = store.create(child).await.expect("child");

        store.delete(&owner.object_ref()).await.expect("delete");
        assert!(!store.contains(&child.object_ref()));
        let err = store.delete(&owner.object_ref()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn finalizers_defer_deletion_until_cleared() {
        let store = MemoryStore::new();
        let mut obj = config_map("guarded");
        obj.metadata.finalizers = vec!["example.com/hold".into()];
        let obj = store.create(obj).await.expect("create");

        store.delete(&obj.object_ref()).await.expect("delete");
        let deleting = store.get(&obj.object_ref()).await.expect("still present");
        assert!(deleting.is_deleting());

        let mut cleared = deleting;
        cleared.metadata.finalizers.clear();
        store.update(cleared).await.expect("clear finalizers");
        assert!(!store.contains(&obj.object_ref()));
    }

    #[tokio::test]
    async fn watch_starts_with_current_object() {
        let store = MemoryStore::new();
        let obj = store.create(config_map("w")).await.expect("create");
        let mut rx = store.watch(&obj.object_ref()).await.expect("watch");
        assert!(matches!(rx.recv().await, Some(WatchEvent::Added(_))));

        let mut changed = obj.clone();
        changed.set_pointer("/data/x", json!("1"));
        store.update(changed).await.expect("update");
        assert!(matches!(rx.recv().await, Some(WatchEvent::Modified(_))));

        store.delete(&obj.object_ref()).await.expect("delete");
        assert!(matches!(rx.recv().await, Some(WatchEvent::Deleted(_))));
    }

    #[tokio::test]
    async fn simulated_subscription_generates_unapproved_plan() {
        let store = MemoryStore::simulated(Simulation::openshift());
        let mut sub = ManagedResource::new(
            "operators.coreos.com/v1alpha1",
            "Subscription",
            "openshift-gitops-operator",
            Some("openshift-operators"),
        );
        sub.set_pointer("/spec/name", json!("openshift-gitops-operator"));
        let sub = store.create(sub).await.expect("create");
        let sub = store.get(&sub.object_ref()).await.expect("get");
        assert_eq!(sub.pointer_str("/status/currentCSV"), Some("openshift-gitops-operator.latest"));
        assert_eq!(
            sub.pointer_str("/status/installPlanRef/name"),
            Some("install-openshift-gitops-operator")
        );

        let plan_ref = ObjectRef::namespaced(
            "operators.coreos.com/v1alpha1",
            "InstallPlan",
            "openshift-operators",
            "install-openshift-gitops-operator",
        );
        let mut plan = store.get(&plan_ref).await.expect("plan");
        assert_eq!(plan.pointer("/spec/approved"), Some(&json!(false)));

        plan.set_pointer("/spec/approved", json!(true));
        store.update(plan).await.expect("approve");
        let sub = store.get(&sub.object_ref()).await.expect("get");
        assert_eq!(sub.pointer_str("/status/installedCSV"), Some("openshift-gitops-operator.latest"));
        let operator = ObjectRef::deployment("openshift-operators", "gitops-operator-controller-manager");
        let operator = store.get(&operator).await.expect("operator spawned");
        assert_eq!(operator.pointer("/status/readyReplicas"), Some(&json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn rollout_delay_defers_readiness() {
        let store = MemoryStore::simulated(
            Simulation::openshift().with_rollout_delay(std::time::Duration::from_secs(3)),
        );
        let mut dep = ManagedResource::new("apps/v1", "Deployment", "redis", Some("workshop-infra"));
        dep.set_pointer("/spec/replicas", json!(2));
        let dep = store.create(dep).await.expect("create");
        assert!(dep.pointer("/status/readyReplicas").is_none());

        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
        let dep = store.get(&dep.object_ref()).await.expect("get");
        assert_eq!(dep.pointer("/status/readyReplicas"), Some(&json!(2)));
    }
}
