//! Per-user staging namespaces and their role bindings.

use workshop_core::{Component, Workshop};
use workshop_manifests::params::{Meta, RoleBindingParams, Subject};

use super::{namespace, part_of, prune_start, user_name, ARGOCD_CONTROLLER_USER};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::{IndexedRef, PruneSpec, Step};

const SYSTEM: &str = "project";
const RBAC_API: &str = "rbac.authorization.k8s.io/v1";

pub struct ProjectInstaller;

impl Installer for ProjectInstaller {
    fn component(&self) -> Component {
        Component::Project
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let staging = workshop.spec.infrastructure.project.staging_name.as_str();
        if staging.is_empty() {
            tracing::info!(workshop = %workshop.metadata.name, "no staging name, no user projects");
            return Ok(vec![]);
        }

        let mut steps = Vec::new();
        for index in 1..=ctx.users {
            let project = workshop.spec.staging_namespace(index);
            let user = user_name(index);
            let meta = |name: String| Meta::namespaced(&project, name).with_labels(part_of(SYSTEM));

            steps.push(namespace(ctx, &project, part_of(SYSTEM))?);
            steps.push(Step::Apply(ctx.manifests.build(&RoleBindingParams::to_cluster_role(
                meta(format!("{user}-project")),
                "edit",
                vec![Subject::user(&user)],
            ))?));
            steps.push(Step::Apply(ctx.manifests.build(&RoleBindingParams::to_cluster_role(
                meta(format!("{user}-default")),
                "view",
                vec![Subject::service_account(&project, "default")],
            ))?));
            steps.push(Step::Apply(ctx.manifests.build(&RoleBindingParams::to_cluster_role(
                meta(format!("{user}-argocd")),
                "edit",
                vec![Subject::user(ARGOCD_CONTROLLER_USER)],
            ))?));
        }

        steps.push(Step::Prune(PruneSpec {
            start: prune_start(ctx.users),
            marker: IndexedRef::cluster("v1", "Namespace", &format!("{staging}{{i}}")),
            targets: ["project", "default", "argocd"]
                .iter()
                .map(|suffix| {
                    IndexedRef::namespaced(
                        RBAC_API,
                        "RoleBinding",
                        &format!("{staging}{{i}}"),
                        &format!("user{{i}}-{suffix}"),
                    )
                })
                .collect(),
        }));
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{applied, find, plan, workshop};

    #[test]
    fn one_namespace_and_three_bindings_per_user() {
        let steps = plan(&ProjectInstaller, &workshop(3, |_| {}));
        let refs = applied(&steps);
        for i in 1..=3 {
            assert!(refs.contains(&format!("Namespace/cn-project{i}")));
            for suffix in ["project", "default", "argocd"] {
                assert!(refs.contains(&format!("RoleBinding/cn-project{i}/user{i}-{suffix}")));
            }
        }
        assert_eq!(refs.len(), 12);
        assert!(!refs.iter().any(|r| r.contains("cn-project4")));
    }

    #[test]
    fn prune_starts_above_user_count() {
        let steps = plan(&ProjectInstaller, &workshop(2, |_| {}));
        match steps.last() {
            Some(Step::Prune(spec)) => {
                assert_eq!(spec.start, 3);
                assert_eq!(spec.marker.resolve(3).name, "cn-project3");
            }
            other => panic!("expected prune, got {other:?}"),
        }
    }

    #[test]
    fn argocd_binding_targets_application_controller() {
        let steps = plan(&ProjectInstaller, &workshop(1, |_| {}));
        let binding = find(&steps, "RoleBinding/cn-project1/user1-argocd");
        assert_eq!(binding.pointer_str("/subjects/0/name"), Some(ARGOCD_CONTROLLER_USER));
        assert_eq!(binding.pointer_str("/roleRef/name"), Some("edit"));
    }

    #[test]
    fn empty_staging_name_plans_nothing() {
        let ws = workshop(3, |spec| spec.infrastructure.project.staging_name.clear());
        assert!(plan(&ProjectInstaller, &ws).is_empty());
    }

    #[test]
    fn zero_users_only_prunes() {
        let steps = plan(&ProjectInstaller, &workshop(0, |_| {}));
        assert_eq!(steps.len(), 1);
        assert!(matches!(&steps[0], Step::Prune(spec) if spec.start == 1));
    }
}
