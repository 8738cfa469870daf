//! Typed template parameters, one struct per [`ManifestKind`].
//!
//! Container-level fields serialize in Kubernetes camelCase so templates can
//! emit them with a single `json_encode`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::engine::ManifestKind;

/// A parameter set that renders through one template.
pub trait Manifest: Serialize {
    fn kind(&self) -> ManifestKind;
}

// ---------------------------------------------------------------------------
// Shared fragments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct Meta {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl Meta {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Value>,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Value read from key `key` of Secret `secret`.
    pub fn from_secret(name: impl Into<String>, secret: &str, key: &str) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(serde_json::json!({
                "secretKeyRef": { "name": secret, "key": key }
            })),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub protocol: String,
}

impl ContainerPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            container_port: port,
            name: None,
            protocol: "TCP".to_string(),
        }
    }

    pub fn named(port: u16, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::tcp(port)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

impl VolumeMount {
    pub fn new(name: &str, mount_path: &str) -> Self {
        Self {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_pull_policy: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Value>,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            image_pull_policy: "IfNotPresent".to_string(),
            command: vec![],
            args: vec![],
            env: vec![],
            ports: vec![],
            volume_mounts: vec![],
            resources: None,
            readiness_probe: None,
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }

    pub fn secret_env(mut self, name: impl Into<String>, secret: &str, key: &str) -> Self {
        self.env.push(EnvVar::from_secret(name, secret, key));
        self
    }

    pub fn port(mut self, port: ContainerPort) -> Self {
        self.ports.push(port);
        self
    }

    pub fn mount(mut self, name: &str, path: &str) -> Self {
        self.volume_mounts.push(VolumeMount::new(name, path));
        self
    }

    pub fn pull_always(mut self) -> Self {
        self.image_pull_policy = "Always".to_string();
        self
    }

    pub fn command(mut self, command: &[&str]) -> Self {
        self.command = command.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub protocol: String,
}

impl ServicePort {
    pub fn tcp(name: &str, port: u16, target_port: u16) -> Self {
        Self {
            name: name.to_string(),
            port,
            target_port,
            protocol: "TCP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: "User".to_string(),
            name: name.into(),
            namespace: None,
            api_group: Some("rbac.authorization.k8s.io".to_string()),
        }
    }

    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "ServiceAccount".to_string(),
            name: name.into(),
            namespace: Some(namespace.into()),
            api_group: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

impl PolicyRule {
    pub fn new(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| (*s).to_string()).collect();
        Self {
            api_groups: owned(api_groups),
            resources: owned(resources),
            verbs: owned(verbs),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-template parameter sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceParams {
    #[serde(flatten)]
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceAccountParams {
    #[serde(flatten)]
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigMapParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub secret_type: String,
    pub string_data: BTreeMap<String, String>,
}

impl SecretParams {
    pub fn opaque(meta: Meta, string_data: BTreeMap<String, String>) -> Self {
        Self {
            meta,
            secret_type: "Opaque".to_string(),
            string_data,
        }
    }
}

/// `Role`, or `ClusterRole` when `cluster_scoped`.
#[derive(Debug, Clone, Serialize)]
pub struct RoleParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub cluster_scoped: bool,
    pub rules: Vec<PolicyRule>,
}

/// `RoleBinding`, or `ClusterRoleBinding` when `cluster_scoped`.
#[derive(Debug, Clone, Serialize)]
pub struct RoleBindingParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub cluster_scoped: bool,
    pub role_kind: String,
    pub role_name: String,
    pub subjects: Vec<Subject>,
}

impl RoleBindingParams {
    /// Namespaced binding to a `ClusterRole` (edit, view, admin, ...).
    pub fn to_cluster_role(meta: Meta, role: &str, subjects: Vec<Subject>) -> Self {
        Self {
            meta,
            cluster_scoped: false,
            role_kind: "ClusterRole".to_string(),
            role_name: role.to_string(),
            subjects,
        }
    }

    pub fn to_role(meta: Meta, role: &str, subjects: Vec<Subject>) -> Self {
        Self {
            meta,
            cluster_scoped: false,
            role_kind: "Role".to_string(),
            role_name: role.to_string(),
            subjects,
        }
    }

    pub fn cluster(meta: Meta, role: &str, subjects: Vec<Subject>) -> Self {
        Self {
            meta,
            cluster_scoped: true,
            role_kind: "ClusterRole".to_string(),
            role_name: role.to_string(),
            subjects,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceParams {
    #[serde(flatten)]
    pub meta: Meta,
    /// `Some("None")` for a headless service.
    pub cluster_ip: Option<String>,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub host: Option<String>,
    pub service: String,
    pub target_port: Value,
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistentVolumeClaimParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub storage: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub replicas: u32,
    /// Used as both `spec.selector.matchLabels` and the pod template labels.
    pub selector: BTreeMap<String, String>,
    pub pod_annotations: BTreeMap<String, String>,
    pub service_account: Option<String>,
    pub containers: Vec<Container>,
    pub volumes: Vec<Value>,
}

impl DeploymentParams {
    pub fn single(meta: Meta, selector: BTreeMap<String, String>, container: Container) -> Self {
        Self {
            meta,
            replicas: 1,
            selector,
            pod_annotations: BTreeMap::new(),
            service_account: None,
            containers: vec![container],
            volumes: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatefulSetParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub service_name: String,
    pub replicas: u32,
    pub selector: BTreeMap<String, String>,
    pub service_account: Option<String>,
    pub containers: Vec<Container>,
    pub volumes: Vec<Value>,
    pub volume_claims: Vec<Value>,
}

/// Operator catalog subscription with manual install-plan approval.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub package: String,
    pub channel: String,
    /// `redhat-operators`, `certified-operators`, or `community-operators`.
    pub catalog: String,
    pub starting_csv: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorGroupParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub target_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomResourceDefinitionParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub group: String,
    pub crd_kind: String,
    pub list_kind: String,
    pub plural: String,
    pub singular: String,
    pub namespaced: bool,
    pub versions: Vec<String>,
}

impl CustomResourceDefinitionParams {
    /// `<plural>.<group>` CRD with one served version.
    pub fn new(group: &str, kind: &str, plural: &str, version: &str) -> Self {
        Self {
            meta: Meta::cluster(format!("{plural}.{group}")),
            group: group.to_string(),
            crd_kind: kind.to_string(),
            list_kind: format!("{kind}List"),
            plural: plural.to_string(),
            singular: kind.to_ascii_lowercase(),
            namespaced: true,
            versions: vec![version.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomResourceParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub api_version: String,
    pub kind: String,
    pub spec: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutatingWebhookParams {
    #[serde(flatten)]
    pub meta: Meta,
    pub webhook_name: String,
    pub service: String,
    pub service_namespace: String,
    pub path: String,
}

// ---------------------------------------------------------------------------
// Manifest impls
// ---------------------------------------------------------------------------

macro_rules! manifest_kind {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl Manifest for $ty {
            fn kind(&self) -> ManifestKind {
                ManifestKind::$kind
            }
        })*
    };
}

manifest_kind! {
    NamespaceParams => Namespace,
    ServiceAccountParams => ServiceAccount,
    ConfigMapParams => ConfigMap,
    SecretParams => Secret,
    RoleParams => Role,
    RoleBindingParams => RoleBinding,
    ServiceParams => Service,
    RouteParams => Route,
    PersistentVolumeClaimParams => PersistentVolumeClaim,
    DeploymentParams => Deployment,
    StatefulSetParams => StatefulSet,
    SubscriptionParams => Subscription,
    OperatorGroupParams => OperatorGroup,
    CustomResourceDefinitionParams => CustomResourceDefinition,
    CustomResourceParams => CustomResource,
    MutatingWebhookParams => MutatingWebhook,
}
