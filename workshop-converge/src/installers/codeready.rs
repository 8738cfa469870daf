//! CodeReady Workspaces operator and its CheCluster.

use serde_json::json;

use workshop_core::{Component, ObjectRef, Workshop};
use workshop_manifests::params::{Meta, OperatorGroupParams};

use super::{custom_resource, namespace, part_of, Operator, REDHAT_CATALOG};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

pub const WORKSPACES_NAMESPACE: &str = "workspaces";
const SYSTEM: &str = "codeready";

pub struct CodeReadyInstaller;

impl Installer for CodeReadyInstaller {
    fn component(&self) -> Component {
        Component::CodeReadyWorkspace
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let spec = &workshop.spec.infrastructure.code_ready_workspace;

        let group = ctx.manifests.build(&OperatorGroupParams {
            meta: Meta::namespaced(WORKSPACES_NAMESPACE, WORKSPACES_NAMESPACE).with_labels(part_of(SYSTEM)),
            target_namespaces: vec![WORKSPACES_NAMESPACE.to_string()],
        })?;
        let mut steps = vec![namespace(ctx, WORKSPACES_NAMESPACE, part_of(SYSTEM))?, Step::Apply(group)];
        steps.extend(
            Operator {
                package: "codeready-workspaces",
                namespace: WORKSPACES_NAMESPACE,
                catalog: REDHAT_CATALOG,
                hub: &spec.operator_hub,
            }
            .steps(ctx)?,
        );
        steps.push(Step::await_rollout(ObjectRef::deployment(
            WORKSPACES_NAMESPACE,
            "codeready-operator",
        )));

        let cluster = custom_resource(
            ctx,
            Meta::namespaced(WORKSPACES_NAMESPACE, "codereadyworkspaces").with_labels(part_of(SYSTEM)),
            "org.eclipse.che/v1",
            "CheCluster",
            json!({
                "server": {
                    "cheFlavor": "codeready",
                    "cheImageTag": "",
                    "devfileRegistryImage": "",
                    "pluginRegistryImage": spec.plugin_registry_image.reference(),
                    "tlsSupport": true,
                    "selfSignedCert": false,
                    "customCheProperties": {
                        "CHE_INFRA_KUBERNETES_NAMESPACE_DEFAULT": "<username>-workspace",
                        "CHE_LIMITS_USER_WORKSPACES_RUN_COUNT": "2",
                        "CHE_LIMITS_WORKSPACE_IDLE_TIMEOUT": "0"
                    }
                },
                "database": {"externalDb": false},
                "auth": {
                    "openShiftoAuth": spec.openshift_oauth,
                    "externalIdentityProvider": false
                },
                "storage": {
                    "pvcStrategy": "per-workspace",
                    "pvcClaimSize": "1Gi",
                    "preCreateSubPaths": true
                }
            }),
        )?;
        steps.push(Step::Apply(cluster));
        Ok(steps)
    }
}
