//! The ordered subsystem list the orchestrator walks.
//!
//! Order reflects real prerequisites: the portal and per-user projects come
//! before services that reference them, RBAC/project scoping before anything
//! issuing per-user credentials into those projects, and the service mesh
//! before the mesh-aware serverless runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::WorkshopSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Portal,
    Project,
    Bookbag,
    Nexus,
    Pipeline,
    Gitea,
    GitOps,
    CodeReadyWorkspace,
    ServiceMesh,
    Serverless,
    Vault,
    CertManager,
    IstioWorkspace,
}

impl Component {
    /// Dependency order; the orchestrator never runs a later entry before an
    /// earlier one has converged within the same tick.
    pub const ORDER: &'static [Component] = &[
        Component::Portal,
        Component::Project,
        Component::Bookbag,
        Component::Nexus,
        Component::Pipeline,
        Component::Gitea,
        Component::GitOps,
        Component::CodeReadyWorkspace,
        Component::ServiceMesh,
        Component::Serverless,
        Component::Vault,
        Component::CertManager,
        Component::IstioWorkspace,
    ];

    /// Short identifier used on the CLI and in logs.
    pub fn slug(&self) -> &'static str {
        match self {
            Component::Portal => "portal",
            Component::Project => "project",
            Component::Bookbag => "bookbag",
            Component::Nexus => "nexus",
            Component::Pipeline => "pipeline",
            Component::Gitea => "gitea",
            Component::GitOps => "gitops",
            Component::CodeReadyWorkspace => "codeready",
            Component::ServiceMesh => "servicemesh",
            Component::Serverless => "serverless",
            Component::Vault => "vault",
            Component::CertManager => "certmanager",
            Component::IstioWorkspace => "istioworkspace",
        }
    }

    /// Name of the observed-status field this component reports through.
    pub fn status_field(&self) -> &'static str {
        match self {
            Component::Portal => "usernameDistribution",
            Component::Project => "project",
            Component::Bookbag => "bookbag",
            Component::Nexus => "nexus",
            Component::Pipeline => "pipeline",
            Component::Gitea => "gitea",
            Component::GitOps => "gitops",
            Component::CodeReadyWorkspace => "codeReadyWorkspace",
            Component::ServiceMesh => "serviceMesh",
            Component::Serverless => "serverless",
            Component::Vault => "vault",
            Component::CertManager => "certManager",
            Component::IstioWorkspace => "istioWorkspace",
        }
    }

    pub fn is_enabled(&self, spec: &WorkshopSpec) -> bool {
        let infra = &spec.infrastructure;
        match self {
            Component::Portal => true,
            Component::Project => infra.project.enabled,
            Component::Bookbag => infra.guide.bookbag.enabled,
            Component::Nexus => infra.nexus.enabled,
            Component::Pipeline => infra.pipeline.enabled,
            Component::Gitea => infra.gitea.enabled,
            Component::GitOps => infra.gitops.enabled,
            Component::CodeReadyWorkspace => infra.code_ready_workspace.enabled,
            // Serverless needs the mesh control plane underneath it.
            Component::ServiceMesh => infra.service_mesh.enabled || infra.serverless.enabled,
            Component::Serverless => infra.serverless.enabled,
            Component::Vault => infra.vault.enabled,
            Component::CertManager => infra.cert_manager.enabled,
            Component::IstioWorkspace => infra.istio_workspace.enabled,
        }
    }

    /// Enabled components of `spec`, in dependency order.
    pub fn enabled_for(spec: &WorkshopSpec) -> Vec<Component> {
        Self::ORDER
            .iter()
            .copied()
            .filter(|c| c.is_enabled(spec))
            .collect()
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_lowercase();
        Self::ORDER
            .iter()
            .copied()
            .find(|c| c.slug() == wanted || c.status_field().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("unknown component '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn order_lists_every_component_once() {
        let mut seen = std::collections::HashSet::new();
        for c in Component::ORDER {
            assert!(seen.insert(*c), "{c} listed twice");
        }
        assert_eq!(seen.len(), 13);
        assert_eq!(Component::ORDER[0], Component::Portal);
        assert_eq!(Component::ORDER[12], Component::IstioWorkspace);
    }

    #[test]
    fn mesh_precedes_serverless_and_projects_precede_gitops() {
        let pos = |c: Component| Component::ORDER.iter().position(|x| *x == c).unwrap();
        assert!(pos(Component::ServiceMesh) < pos(Component::Serverless));
        assert!(pos(Component::Project) < pos(Component::GitOps));
        assert!(pos(Component::Portal) < pos(Component::Bookbag));
    }

    #[test]
    fn portal_is_always_enabled() {
        let spec = WorkshopSpec::default();
        assert_eq!(Component::enabled_for(&spec), vec![Component::Portal]);
    }

    #[rstest]
    #[case(true, false, true)]
    #[case(false, true, true)]
    #[case(false, false, false)]
    fn service_mesh_follows_serverless(
        #[case] mesh: bool,
        #[case] serverless: bool,
        #[case] expected: bool,
    ) {
        let mut spec = WorkshopSpec::default();
        spec.infrastructure.service_mesh.enabled = mesh;
        spec.infrastructure.serverless.enabled = serverless;
        assert_eq!(Component::ServiceMesh.is_enabled(&spec), expected);
    }

    #[rstest]
    #[case("gitops", Component::GitOps)]
    #[case("codeready", Component::CodeReadyWorkspace)]
    #[case("usernameDistribution", Component::Portal)]
    #[case("CertManager", Component::CertManager)]
    fn parses_slugs_and_status_fields(#[case] input: &str, #[case] expected: Component) {
        assert_eq!(input.parse::<Component>(), Ok(expected));
    }

    #[test]
    fn unknown_component_is_rejected() {
        assert!("kafka".parse::<Component>().is_err());
    }
}
