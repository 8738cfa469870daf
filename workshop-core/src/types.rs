//! Desired-state types for a Workshop tenant.
//!
//! Field names follow the camelCase wire shape of the
//! `workshop.mcouliba.com/v1` resource so a document written for the cluster
//! parses unchanged here. Every subsystem block is optional and defaults to
//! disabled.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorkshopError;
use crate::resource::{ManagedResource, ObjectMeta, ObjectRef, OwnerReference};
use crate::status::WorkshopStatus;

pub const API_VERSION: &str = "workshop.mcouliba.com/v1";
pub const KIND: &str = "Workshop";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for one tenant's desired-state document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkshopName(pub String);

impl fmt::Display for WorkshopName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for WorkshopName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkshopName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Shared spec fragments
// ---------------------------------------------------------------------------

/// Operator catalog pin: channel plus an optional exact CSV version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorHubSpec {
    #[serde(default)]
    pub channel: String,
    /// Empty means "track latest".
    #[serde(default)]
    pub cluster_service_version: String,
}

/// Container image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
}

impl ImageSpec {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// `name:tag`, or just `name` when no tag is set.
    pub fn reference(&self) -> String {
        if self.tag.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.name, self.tag)
        }
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserSpec {
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "gitURL", default)]
    pub git_url: String,
    #[serde(rename = "gitBranch", default)]
    pub git_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertManagerSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub operator_hub: OperatorHubSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeReadyWorkspaceSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub operator_hub: OperatorHubSpec,
    #[serde(rename = "openshiftOAuth", default)]
    pub openshift_oauth: bool,
    #[serde(default)]
    pub plugin_registry_image: ImageSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GiteaSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub image: ImageSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub operator_hub: OperatorHubSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookbagSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub image: ImageSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScholarsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Module name to guide URL; published through the portal.
    #[serde(rename = "guideURL", default)]
    pub guide_url: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuideSpec {
    #[serde(default)]
    pub bookbag: BookbagSpec,
    #[serde(default)]
    pub scholars: ScholarsSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IstioWorkspaceSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub operator_hub: OperatorHubSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NexusSpec {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub operator_hub: OperatorHubSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Prefix of the per-user staging namespaces (`<stagingName><i>`).
    #[serde(default)]
    pub staging_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMeshSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub service_mesh_operator_hub: OperatorHubSpec,
    #[serde(default)]
    pub elastic_search_operator_hub: OperatorHubSpec,
    #[serde(default)]
    pub jaeger_operator_hub: OperatorHubSpec,
    #[serde(default)]
    pub kiali_operator_hub: OperatorHubSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub operator_hub: OperatorHubSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub image: ImageSpec,
    #[serde(default)]
    pub agent_injector_image: ImageSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    #[serde(default)]
    pub cert_manager: CertManagerSpec,
    #[serde(default)]
    pub code_ready_workspace: CodeReadyWorkspaceSpec,
    #[serde(default)]
    pub gitea: GiteaSpec,
    #[serde(default)]
    pub gitops: GitOpsSpec,
    #[serde(default)]
    pub guide: GuideSpec,
    #[serde(default)]
    pub istio_workspace: IstioWorkspaceSpec,
    #[serde(default)]
    pub nexus: NexusSpec,
    #[serde(default)]
    pub pipeline: PipelineSpec,
    #[serde(default)]
    pub project: ProjectSpec,
    #[serde(default)]
    pub service_mesh: ServiceMeshSpec,
    #[serde(default)]
    pub serverless: ServerlessSpec,
    #[serde(default)]
    pub vault: VaultSpec,
}

/// The root desired-state description for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkshopSpec {
    #[serde(default)]
    pub user: UserSpec,
    #[serde(default)]
    pub source: SourceSpec,
    #[serde(default)]
    pub infrastructure: InfrastructureSpec,
}

impl WorkshopSpec {
    /// Number of tenant users; negative counts clamp to zero.
    pub fn user_count(&self) -> usize {
        usize::try_from(self.user.number.max(0)).unwrap_or(0)
    }

    /// `<stagingName><index>`, the per-user project namespace.
    pub fn staging_namespace(&self, index: usize) -> String {
        format!("{}{}", self.infrastructure.project.staging_name, index)
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// A Workshop document: desired state plus the observed status the
/// orchestrator projects back onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workshop {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WorkshopSpec,
    #[serde(default)]
    pub status: WorkshopStatus,
}

impl Workshop {
    pub fn new(name: impl Into<String>, spec: WorkshopSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::named(name),
            spec,
            status: WorkshopStatus::default(),
        }
    }

    pub fn name(&self) -> WorkshopName {
        WorkshopName::from(self.metadata.name.clone())
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            namespace: self.metadata.namespace.clone(),
        }
    }

    /// Owner reference that every managed resource carries back to this
    /// document. `None` until the store has assigned a uid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let uid = self.metadata.uid.clone()?;
        Some(OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }

    pub fn to_resource(&self) -> Result<ManagedResource, WorkshopError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_resource(resource: &ManagedResource) -> Result<Self, WorkshopError> {
        if resource.kind != KIND {
            return Err(WorkshopError::UnexpectedKind {
                expected: KIND,
                found: resource.kind.clone(),
            });
        }
        let value = serde_json::to_value(resource)?;
        Ok(serde_json::from_value(value)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(WorkshopName::from("summit").to_string(), "summit");
    }

    #[test]
    fn negative_user_count_clamps_to_zero() {
        let mut spec = WorkshopSpec::default();
        spec.user.number = -4;
        assert_eq!(spec.user_count(), 0);
        spec.user.number = 3;
        assert_eq!(spec.user_count(), 3);
    }

    #[test]
    fn image_reference_omits_empty_tag() {
        assert_eq!(ImageSpec::new("quay.io/x/gitea", "1.2").reference(), "quay.io/x/gitea:1.2");
        assert_eq!(ImageSpec::new("quay.io/x/gitea", "").reference(), "quay.io/x/gitea");
    }

    #[test]
    fn spec_parses_camel_case_wire_names() {
        let yaml = r#"
user:
  number: 2
  password: openshift
source:
  gitURL: https://example.com/lab.git
  gitBranch: main
infrastructure:
  codeReadyWorkspace:
    enabled: true
    openshiftOAuth: true
    operatorHub:
      channel: latest
      clusterServiceVersion: crwoperator.v2.1.0
  guide:
    scholars:
      enabled: true
      guideURL:
        inner-loop: https://guides.example.com/inner
  project:
    enabled: true
    stagingName: my-project
"#;
        let spec: WorkshopSpec = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(spec.user_count(), 2);
        assert_eq!(spec.source.git_branch, "main");
        let crw = &spec.infrastructure.code_ready_workspace;
        assert!(crw.enabled && crw.openshift_oauth);
        assert_eq!(crw.operator_hub.cluster_service_version, "crwoperator.v2.1.0");
        assert_eq!(spec.staging_namespace(2), "my-project2");
        assert!(!spec.infrastructure.gitea.enabled, "absent blocks default to disabled");
        assert_eq!(
            spec.infrastructure.guide.scholars.guide_url.get("inner-loop").map(String::as_str),
            Some("https://guides.example.com/inner")
        );
    }

    #[test]
    fn owner_reference_requires_uid() {
        let mut ws = Workshop::new("summit", WorkshopSpec::default());
        assert!(ws.owner_reference().is_none());
        ws.metadata.uid = Some("abc-123".into());
        let owner = ws.owner_reference().expect("owner");
        assert_eq!(owner.uid, "abc-123");
        assert_eq!(owner.kind, KIND);
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn resource_conversion_preserves_spec_and_status() {
        let mut ws = Workshop::new("summit", WorkshopSpec::default());
        ws.spec.user.number = 5;
        ws.status
            .set(crate::Component::Gitea, crate::ComponentStatus::Installed);
        let resource = ws.to_resource().expect("to resource");
        assert_eq!(resource.kind, KIND);
        assert_eq!(resource.pointer("/spec/user/number"), Some(&serde_json::json!(5)));
        let back = Workshop::from_resource(&resource).expect("from resource");
        assert_eq!(back, ws);
    }

    #[test]
    fn from_resource_rejects_other_kinds() {
        let resource = ManagedResource::new("v1", "ConfigMap", "x", None);
        let err = Workshop::from_resource(&resource).unwrap_err();
        assert!(matches!(err, WorkshopError::UnexpectedKind { .. }));
    }
}
