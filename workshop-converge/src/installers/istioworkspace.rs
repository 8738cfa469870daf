//! Istio Workspace operator and per-user permission to use it.

use workshop_core::{Component, Workshop};
use workshop_manifests::params::{Meta, PolicyRule, RoleBindingParams, RoleParams, Subject};

use super::{part_of, user_name, Operator, COMMUNITY_CATALOG, OPERATORS_NAMESPACE};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

const SYSTEM: &str = "istio-workspace";

pub struct IstioWorkspaceInstaller;

impl Installer for IstioWorkspaceInstaller {
    fn component(&self) -> Component {
        Component::IstioWorkspace
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut steps = Operator {
            package: "istio-workspace-operator",
            namespace: OPERATORS_NAMESPACE,
            catalog: COMMUNITY_CATALOG,
            hub: &workshop.spec.infrastructure.istio_workspace.operator_hub,
        }
        .steps(ctx)?;
        if workshop.spec.infrastructure.project.staging_name.is_empty() {
            return Ok(steps);
        }

        for index in 1..=ctx.users {
            let project = workshop.spec.staging_namespace(index);
            let user = user_name(index);
            let name = format!("{user}-istio-workspace");
            let meta = || Meta::namespaced(&project, &name).with_labels(part_of(SYSTEM));

            let role = ctx.manifests.build(&RoleParams {
                meta: meta(),
                cluster_scoped: false,
                rules: vec![
                    PolicyRule::new(&["maistra.io"], &["sessions"], &["*"]),
                    PolicyRule::new(&["apps"], &["deployments", "replicasets"], &["*"]),
                    PolicyRule::new(&["apps.openshift.io"], &["deploymentconfigs"], &["*"]),
                    PolicyRule::new(&["networking.istio.io"], &["virtualservices", "destinationrules", "gateways"], &["*"]),
                ],
            })?;
            let binding = ctx
                .manifests
                .build(&RoleBindingParams::to_role(meta(), &name, vec![Subject::user(&user)]))?;
            steps.push(Step::Apply(role));
            steps.push(Step::Apply(binding));
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{applied, find, plan, workshop};

    #[test]
    fn role_and_binding_per_user_project() {
        let steps = plan(&IstioWorkspaceInstaller, &workshop(2, |s| s.infrastructure.istio_workspace.enabled = true));
        let refs = applied(&steps);
        assert_eq!(refs[0], "Subscription/openshift-operators/istio-workspace-operator");
        assert!(refs.contains(&"Role/cn-project2/user2-istio-workspace".to_string()));
        let binding = find(&steps, "RoleBinding/cn-project1/user1-istio-workspace");
        assert_eq!(binding.pointer_str("/roleRef/kind"), Some("Role"));
        assert_eq!(binding.pointer_str("/subjects/0/name"), Some("user1"));
    }
}
