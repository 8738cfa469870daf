//! Idempotent applier: create where "already exists" is success, plus a
//! diff-then-update path for resources whose owned fields may drift.

use serde_json::Value;

use workshop_core::{ManagedResource, OwnerReference};

use crate::drift;
use crate::error::{ConvergeError, StoreError};
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Exists,
    Updated,
}

impl ApplyOutcome {
    pub fn created(&self) -> bool {
        matches!(self, ApplyOutcome::Created)
    }
}

// ---------------------------------------------------------------------------
// Owned fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    /// Equal only when identical.
    Exact,
    /// Map field where desired keys must be present with desired values;
    /// extra keys on the existing object are left alone.
    IntersectMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OwnedField {
    pointer: String,
    mode: FieldMode,
}

/// The JSON pointers the orchestrator owns on a resource. Everything else on
/// the stored object belongs to operators or the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedFields {
    fields: Vec<OwnedField>,
}

impl OwnedFields {
    pub fn exact(pointers: &[&str]) -> Self {
        Self::default().with(pointers, FieldMode::Exact)
    }

    pub fn intersect(pointers: &[&str]) -> Self {
        Self::default().with(pointers, FieldMode::IntersectMap)
    }

    pub fn with(mut self, pointers: &[&str], mode: FieldMode) -> Self {
        self.fields.extend(pointers.iter().map(|p| OwnedField {
            pointer: (*p).to_string(),
            mode,
        }));
        self
    }

    pub fn pointers(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.pointer.as_str())
    }

    pub fn equal(&self, desired: &ManagedResource, existing: &ManagedResource) -> bool {
        self.fields.iter().all(|field| {
            let want = desired.pointer(&field.pointer);
            let have = existing.pointer(&field.pointer);
            match field.mode {
                FieldMode::Exact => want == have,
                FieldMode::IntersectMap => match (want, have) {
                    (None, _) => true,
                    (Some(Value::Object(want)), Some(Value::Object(have))) => {
                        want.iter().all(|(k, v)| have.get(k) == Some(v))
                    }
                    (Some(_), _) => false,
                },
            }
        })
    }

    /// `existing` with the owned fields taken from `desired`.
    pub fn merge(&self, desired: &ManagedResource, mut existing: ManagedResource) -> ManagedResource {
        for field in &self.fields {
            let Some(want) = desired.pointer(&field.pointer).cloned() else {
                if field.mode == FieldMode::Exact {
                    existing.remove_pointer(&field.pointer);
                }
                continue;
            };
            match (field.mode, want) {
                (FieldMode::IntersectMap, Value::Object(want)) => {
                    let mut merged = match existing.pointer(&field.pointer) {
                        Some(Value::Object(have)) => have.clone(),
                        _ => serde_json::Map::new(),
                    };
                    merged.extend(want);
                    existing.set_pointer(&field.pointer, Value::Object(merged));
                }
                (_, want) => existing.set_pointer(&field.pointer, want),
            }
        }
        existing
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

pub struct Applier<'a> {
    store: &'a dyn ObjectStore,
    owner: &'a OwnerReference,
}

impl<'a> Applier<'a> {
    pub fn new(store: &'a dyn ObjectStore, owner: &'a OwnerReference) -> Self {
        Self { store, owner }
    }

    /// Create `desired`; an existing object of the same identity is success.
    pub async fn apply(&self, mut desired: ManagedResource) -> Result<ApplyOutcome, ConvergeError> {
        desired.stamp_owner(self.owner);
        let target = desired.object_ref();
        match self.store.create(desired).await {
            Ok(_) => {
                tracing::info!(kind = %target.kind, name = %target.name, namespace = ?target.namespace, "created");
                Ok(ApplyOutcome::Created)
            }
            Err(StoreError::AlreadyExists(_)) => {
                tracing::debug!(kind = %target.kind, name = %target.name, namespace = ?target.namespace, "unchanged");
                Ok(ApplyOutcome::Exists)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Like [`Applier::apply`], but when the object exists and `equal` says it
    /// has drifted, write back `merge(desired, existing)`.
    pub async fn apply_with_update(
        &self,
        mut desired: ManagedResource,
        equal: &(dyn Fn(&ManagedResource, &ManagedResource) -> bool + Send + Sync),
        merge: &(dyn Fn(&ManagedResource, ManagedResource) -> ManagedResource + Send + Sync),
    ) -> Result<ApplyOutcome, ConvergeError> {
        desired.stamp_owner(self.owner);
        let target = desired.object_ref();
        match self.store.create(desired.clone()).await {
            Ok(_) => {
                tracing::info!(kind = %target.kind, name = %target.name, namespace = ?target.namespace, "created");
                return Ok(ApplyOutcome::Created);
            }
            Err(StoreError::AlreadyExists(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let existing = self.store.get(&target).await?;
        if equal(&desired, &existing) {
            tracing::debug!(kind = %target.kind, name = %target.name, namespace = ?target.namespace, "unchanged");
            return Ok(ApplyOutcome::Exists);
        }

        let mut merged = merge(&desired, existing.clone());
        merged.stamp_owner(self.owner);
        if let Some(diff) = drift::resource_diff(&existing, &merged) {
            tracing::debug!(target_ref = %target, "drift:\n{diff}");
        }
        self.store.update(merged).await?;
        tracing::info!(kind = %target.kind, name = %target.name, namespace = ?target.namespace, "updated");
        Ok(ApplyOutcome::Updated)
    }

    pub async fn apply_owned(
        &self,
        desired: ManagedResource,
        fields: &OwnedFields,
    ) -> Result<ApplyOutcome, ConvergeError> {
        self.apply_with_update(
            desired,
            &|want, have| fields.equal(want, have),
            &|want, have| fields.merge(want, have),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "workshop.mcouliba.com/v1".into(),
            kind: "Workshop".into(),
            name: "summit".into(),
            uid: "w-1".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn argocd_cm(accounts: &[&str]) -> ManagedResource {
        let mut cm = ManagedResource::new("v1", "ConfigMap", "argocd-cm", Some("argocd"));
        for user in accounts {
            cm.set_pointer(&format!("/data/accounts.{user}"), json!("login"));
        }
        cm
    }

    #[tokio::test]
    async fn apply_twice_is_one_create() {
        let store = MemoryStore::new();
        let owner = owner();
        let applier = Applier::new(&store, &owner);

        let first = applier.apply(argocd_cm(&["user1"])).await.expect("first");
        let second = applier.apply(argocd_cm(&["user1"])).await.expect("second");
        assert!(first.created());
        assert_eq!(second, ApplyOutcome::Exists);
        assert_eq!(store.counts("ConfigMap").creates, 1);
        assert_eq!(store.objects_of_kind("ConfigMap").len(), 1);

        let stored = &store.objects_of_kind("ConfigMap")[0];
        assert!(stored.has_owner("w-1"));
    }

    #[tokio::test]
    async fn exact_drift_is_written_back_preserving_other_fields() {
        let store = MemoryStore::new();
        let owner = owner();
        let applier = Applier::new(&store, &owner);

        let mut dep = ManagedResource::new("apps/v1", "Deployment", "portal", Some("workshop-infra"));
        dep.set_pointer("/spec/template/spec/containers", json!([{"name": "portal", "image": "a:1"}]));
        applier.apply(dep.clone()).await.expect("create");

        let target = dep.object_ref();
        let mut live = store.get(&target).await.expect("get");
        live.set_pointer("/spec/replicas", json!(3));
        store.update(live).await.expect("operator edit");

        dep.set_pointer("/spec/template/spec/containers", json!([{"name": "portal", "image": "a:2"}]));
        let fields = OwnedFields::exact(&["/spec/template/spec/containers"]);
        let outcome = applier.apply_owned(dep.clone(), &fields).await.expect("update");
        assert_eq!(outcome, ApplyOutcome::Updated);

        let live = store.get(&target).await.expect("get");
        assert_eq!(live.pointer_str("/spec/template/spec/containers/0/image"), Some("a:2"));
        assert_eq!(live.pointer("/spec/replicas"), Some(&json!(3)));

        let again = applier.apply_owned(dep, &fields).await.expect("noop");
        assert_eq!(again, ApplyOutcome::Exists);
    }

    #[tokio::test]
    async fn intersect_accepts_superset_and_merges_missing_keys() {
        let store = MemoryStore::new();
        let owner = owner();
        let applier = Applier::new(&store, &owner);
        let fields = OwnedFields::intersect(&["/data"]);

        let mut existing = argocd_cm(&["user1"]);
        existing.set_pointer("/data/admin.enabled", json!("true"));
        applier.apply(existing).await.expect("create");

        let outcome = applier.apply_owned(argocd_cm(&["user1"]), &fields).await.expect("apply");
        assert_eq!(outcome, ApplyOutcome::Exists);

        let outcome = applier
            .apply_owned(argocd_cm(&["user1", "user2"]), &fields)
            .await
            .expect("apply");
        assert_eq!(outcome, ApplyOutcome::Updated);
        let live = store.get(&argocd_cm(&[]).object_ref()).await.expect("get");
        assert_eq!(live.pointer_str("/data/accounts.user2"), Some("login"));
        assert_eq!(live.pointer_str("/data/admin.enabled"), Some("true"));
    }

    #[tokio::test]
    async fn other_store_errors_propagate() {
        let store = MemoryStore::new();
        let owner = owner();
        let applier = Applier::new(&store, &owner);
        let nameless = ManagedResource::new("v1", "ConfigMap", "", Some("argocd"));
        let err = applier.apply(nameless).await.unwrap_err();
        assert!(matches!(err, ConvergeError::Store(StoreError::Rejected { .. })));
    }
}
