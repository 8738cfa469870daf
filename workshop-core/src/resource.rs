//! Generic managed-resource model shared by manifests, stores, and the
//! convergence engine.
//!
//! A [`ManagedResource`] is an untyped Kubernetes-style object: `apiVersion`,
//! `kind`, typed [`ObjectMeta`], and the remaining top-level fields (`spec`,
//! `data`, `status`, ...) kept as JSON in `body`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Server-populated fields we do not model (creationTimestamp,
    /// managedFields, generation, ...), carried through updates untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A fresh label map for one resource.
///
/// Always build a new map per resource; label sets are never shared between
/// resources.
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// ObjectRef
// ---------------------------------------------------------------------------

/// Identity of a remote object: group/version, kind, name, and namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectRef {
    pub fn namespaced(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn cluster(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    pub fn deployment(namespace: &str, name: &str) -> Self {
        Self::namespaced("apps/v1", "Deployment", namespace, name)
    }

    pub fn namespace(name: &str) -> Self {
        Self::cluster("v1", "Namespace", name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// ManagedResource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedResource {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ManagedResource {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: Option<&str>,
    ) -> Self {
        let mut metadata = ObjectMeta::named(name);
        metadata.namespace = namespace.map(str::to_string);
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata,
            body: Map::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            namespace: self.metadata.namespace.clone(),
        }
    }

    /// JSON-pointer lookup into the body (`/spec/replicas`, `/data`, ...).
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let segments = split_pointer(pointer);
        let (first, rest) = segments.split_first()?;
        let mut current = self.body.get(first.as_str())?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment.as_str())?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn pointer_str(&self, pointer: &str) -> Option<&str> {
        self.pointer(pointer).and_then(Value::as_str)
    }

    /// Set the value at `pointer`, creating intermediate objects as needed.
    /// Non-object intermediates are replaced.
    pub fn set_pointer(&mut self, pointer: &str, value: Value) {
        let segments = split_pointer(pointer);
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut map = &mut self.body;
        for segment in parents {
            let entry = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            map = match entry {
                Value::Object(inner) => inner,
                _ => return,
            };
        }
        map.insert(last.clone(), value);
    }

    /// Remove the value at `pointer`; returns what was there.
    pub fn remove_pointer(&mut self, pointer: &str) -> Option<Value> {
        let segments = split_pointer(pointer);
        let (last, parents) = segments.split_last()?;
        let mut map = &mut self.body;
        for segment in parents {
            map = match map.get_mut(segment.as_str())? {
                Value::Object(inner) => inner,
                _ => return None,
            };
        }
        map.remove(last.as_str())
    }

    pub fn has_owner(&self, uid: &str) -> bool {
        self.metadata.owner_references.iter().any(|o| o.uid == uid)
    }

    /// Attach `owner` unless a reference with the same uid is already present.
    pub fn stamp_owner(&mut self, owner: &OwnerReference) {
        if !self.has_owner(&owner.uid) {
            self.metadata.owner_references.push(owner.clone());
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

fn split_pointer(pointer: &str) -> Vec<String> {
    pointer
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "workshop.mcouliba.com/v1".into(),
            kind: "Workshop".into(),
            name: "summit".into(),
            uid: uid.into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn object_ref_display() {
        assert_eq!(
            ObjectRef::deployment("gitea", "gitea-server").to_string(),
            "Deployment/gitea/gitea-server"
        );
        assert_eq!(ObjectRef::namespace("vault").to_string(), "Namespace/vault");
    }

    #[test]
    fn set_pointer_creates_intermediates() {
        let mut res = ManagedResource::new("apps/v1", "Deployment", "redis", Some("infra"));
        res.set_pointer("/status/readyReplicas", json!(1));
        assert_eq!(res.pointer("/status/readyReplicas"), Some(&json!(1)));
        res.set_pointer("/status/readyReplicas", json!(2));
        assert_eq!(res.pointer("/status/readyReplicas"), Some(&json!(2)));
    }

    #[test]
    fn pointer_handles_escaped_keys_and_arrays() {
        let mut res = ManagedResource::new("v1", "ConfigMap", "argocd-cm", Some("argocd"));
        res.set_pointer("/data/accounts.user1", json!("login"));
        res.set_pointer("/metadata~1x/a", json!(true));
        res.body.insert("items".into(), json!([{"n": 1}, {"n": 2}]));
        assert_eq!(res.pointer_str("/data/accounts.user1"), Some("login"));
        assert_eq!(res.pointer("/metadata~1x/a"), Some(&json!(true)));
        assert_eq!(res.pointer("/items/1/n"), Some(&json!(2)));
        assert_eq!(res.pointer("/items/7/n"), None);
    }

    #[test]
    fn remove_pointer_returns_previous_value() {
        let mut res = ManagedResource::new("v1", "Secret", "s", Some("ns"));
        res.set_pointer("/stringData/password", json!("x"));
        assert_eq!(res.remove_pointer("/stringData/password"), Some(json!("x")));
        assert_eq!(res.pointer("/stringData/password"), None);
    }

    #[test]
    fn stamp_owner_is_idempotent() {
        let mut res = ManagedResource::new("v1", "Namespace", "gitea", None);
        res.stamp_owner(&owner("u-1"));
        res.stamp_owner(&owner("u-1"));
        assert_eq!(res.metadata.owner_references.len(), 1);
        assert!(res.has_owner("u-1"));
    }

    #[test]
    fn labels_are_fresh_per_call() {
        let mut a = labels(&[("app", "gitea")]);
        let b = labels(&[("app", "gitea")]);
        a.insert("extra".into(), "x".into());
        assert_eq!(b.len(), 1, "mutating one label set must not leak into another");
    }

    #[test]
    fn unknown_metadata_fields_survive_roundtrip() {
        let raw = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "c", "namespace": "n", "generation": 4},
            "data": {"k": "v"}
        });
        let res: ManagedResource = serde_json::from_value(raw.clone()).expect("parse");
        assert_eq!(res.metadata.extra.get("generation"), Some(&json!(4)));
        assert_eq!(serde_json::to_value(&res).expect("encode"), raw);
    }
}
