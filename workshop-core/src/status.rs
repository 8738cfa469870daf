//! Observed status projected onto the Workshop document.

use serde::{Deserialize, Serialize};

use crate::component::Component;

/// Per-component status value. Serializes to the exact strings `""` and
/// `"Installed"` that the document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComponentStatus {
    #[default]
    #[serde(rename = "")]
    NotStarted,
    Installed,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::NotStarted => "",
            ComponentStatus::Installed => "Installed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkshopStatus {
    #[serde(default)]
    pub bookbag: ComponentStatus,
    #[serde(default)]
    pub cert_manager: ComponentStatus,
    #[serde(default)]
    pub code_ready_workspace: ComponentStatus,
    #[serde(default)]
    pub gitea: ComponentStatus,
    #[serde(default)]
    pub gitops: ComponentStatus,
    #[serde(default)]
    pub istio_workspace: ComponentStatus,
    #[serde(default)]
    pub nexus: ComponentStatus,
    #[serde(default)]
    pub pipeline: ComponentStatus,
    #[serde(default)]
    pub project: ComponentStatus,
    #[serde(default)]
    pub service_mesh: ComponentStatus,
    #[serde(default)]
    pub serverless: ComponentStatus,
    #[serde(default)]
    pub username_distribution: ComponentStatus,
    #[serde(default)]
    pub vault: ComponentStatus,
}

impl WorkshopStatus {
    pub fn get(&self, component: Component) -> ComponentStatus {
        *self.slot(component)
    }

    /// Returns `true` when the stored value changed.
    pub fn set(&mut self, component: Component, status: ComponentStatus) -> bool {
        let slot = self.slot_mut(component);
        let changed = *slot != status;
        *slot = status;
        changed
    }

    /// Components currently reporting `Installed`, in dependency order.
    pub fn installed(&self) -> Vec<Component> {
        Component::ORDER
            .iter()
            .copied()
            .filter(|c| self.get(*c) == ComponentStatus::Installed)
            .collect()
    }

    fn slot(&self, component: Component) -> &ComponentStatus {
        match component {
            Component::Portal => &self.username_distribution,
            Component::Project => &self.project,
            Component::Bookbag => &self.bookbag,
            Component::Nexus => &self.nexus,
            Component::Pipeline => &self.pipeline,
            Component::Gitea => &self.gitea,
            Component::GitOps => &self.gitops,
            Component::CodeReadyWorkspace => &self.code_ready_workspace,
            Component::ServiceMesh => &self.service_mesh,
            Component::Serverless => &self.serverless,
            Component::Vault => &self.vault,
            Component::CertManager => &self.cert_manager,
            Component::IstioWorkspace => &self.istio_workspace,
        }
    }

    fn slot_mut(&mut self, component: Component) -> &mut ComponentStatus {
        match component {
            Component::Portal => &mut self.username_distribution,
            Component::Project => &mut self.project,
            Component::Bookbag => &mut self.bookbag,
            Component::Nexus => &mut self.nexus,
            Component::Pipeline => &mut self.pipeline,
            Component::Gitea => &mut self.gitea,
            Component::GitOps => &mut self.gitops,
            Component::CodeReadyWorkspace => &mut self.code_ready_workspace,
            Component::ServiceMesh => &mut self.service_mesh,
            Component::Serverless => &mut self.serverless,
            Component::Vault => &mut self.vault,
            Component::CertManager => &mut self.cert_manager,
            Component::IstioWorkspace => &mut self.istio_workspace,
        }
    }
}
