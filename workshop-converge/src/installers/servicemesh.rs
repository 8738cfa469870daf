//! OpenShift Service Mesh: its operators, the control plane, and a member
//! roll covering every user project.

use serde_json::{json, Value};

use workshop_core::{Component, ObjectRef, Workshop};
use workshop_manifests::params::{Meta, PolicyRule, RoleBindingParams, RoleParams, Subject};

use super::{
    custom_resource, namespace, part_of, user_name, Operator, ARGOCD_CONTROLLER_USER, OPERATORS_NAMESPACE,
    REDHAT_CATALOG,
};
use crate::applier::OwnedFields;
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

pub const ISTIO_NAMESPACE: &str = "istio-system";
const OPERATORS_REDHAT_NAMESPACE: &str = "openshift-operators-redhat";
const SYSTEM: &str = "istio";

pub struct ServiceMeshInstaller;

impl Installer for ServiceMeshInstaller {
    fn component(&self) -> Component {
        Component::ServiceMesh
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mesh = &workshop.spec.infrastructure.service_mesh;

        let mut steps = vec![namespace(ctx, OPERATORS_REDHAT_NAMESPACE, part_of(SYSTEM))?];
        let operators = [
            ("elasticsearch-operator", OPERATORS_REDHAT_NAMESPACE, &mesh.elastic_search_operator_hub),
            ("jaeger-product", OPERATORS_NAMESPACE, &mesh.jaeger_operator_hub),
            ("kiali-ossm", OPERATORS_NAMESPACE, &mesh.kiali_operator_hub),
            ("servicemeshoperator", OPERATORS_NAMESPACE, &mesh.service_mesh_operator_hub),
        ];
        for (package, operator_namespace, hub) in operators {
            steps.extend(
                Operator {
                    package,
                    namespace: operator_namespace,
                    catalog: REDHAT_CATALOG,
                    hub,
                }
                .steps(ctx)?,
            );
        }
        steps.push(Step::await_rollout(ObjectRef::deployment(OPERATORS_NAMESPACE, "istio-operator")));

        steps.push(namespace(ctx, ISTIO_NAMESPACE, part_of(SYSTEM))?);
        let role = ctx.manifests.build(&RoleParams {
            meta: Meta::namespaced(ISTIO_NAMESPACE, "mesh-user").with_labels(part_of(SYSTEM)),
            cluster_scoped: false,
            rules: vec![PolicyRule::new(
                &["maistra.io"],
                &["servicemeshcontrolplanes"],
                &["get", "list", "watch", "use"],
            )],
        })?;
        let binding = ctx.manifests.build(&RoleBindingParams::to_role(
            Meta::namespaced(ISTIO_NAMESPACE, "mesh-users").with_labels(part_of(SYSTEM)),
            "mesh-user",
            mesh_subjects(workshop, ctx.users),
        ))?;
        steps.push(Step::Apply(role));
        steps.push(Step::ApplyWithUpdate(binding, OwnedFields::exact(&["/subjects"])));

        let control_plane = custom_resource(
            ctx,
            Meta::namespaced(ISTIO_NAMESPACE, "basic").with_labels(part_of(SYSTEM)),
            "maistra.io/v1",
            "ServiceMeshControlPlane",
            control_plane_spec(),
        )?;
        steps.push(Step::Apply(control_plane));

        let members: Vec<String> = if workshop.spec.infrastructure.project.staging_name.is_empty() {
            vec![]
        } else {
            (1..=ctx.users).map(|i| workshop.spec.staging_namespace(i)).collect()
        };
        let member_roll = custom_resource(
            ctx,
            Meta::namespaced(ISTIO_NAMESPACE, "default").with_labels(part_of(SYSTEM)),
            "maistra.io/v1",
            "ServiceMeshMemberRoll",
            json!({ "members": members }),
        )?;
        steps.push(Step::ApplyWithUpdate(member_roll, OwnedFields::exact(&["/spec/members"])));
        Ok(steps)
    }
}

fn mesh_subjects(workshop: &Workshop, users: usize) -> Vec<Subject> {
    let mut subjects: Vec<Subject> = (1..=users).map(|i| Subject::user(user_name(i))).collect();
    if workshop.spec.infrastructure.gitops.enabled {
        subjects.push(Subject::user(ARGOCD_CONTROLLER_USER));
    }
    subjects
}

fn control_plane_spec() -> Value {
    json!({
        "istio": {
            "global": {
                "proxy": {
                    "resources": {
                        "requests": {"cpu": "100m", "memory": "128Mi"},
                        "limits": {"cpu": "500m", "memory": "128Mi"}
                    }
                }
            },
            "gateways": {
                "istio-egressgateway": {"autoscaleEnabled": false},
                "istio-ingressgateway": {"autoscaleEnabled": false, "ior_enabled": true}
            },
            "mixer": {
                "policy": {"autoscaleEnabled": false},
                "telemetry": {
                    "autoscaleEnabled": false,
                    "resources": {
                        "requests": {"cpu": "100m", "memory": "1G"},
                        "limits": {"cpu": "500m", "memory": "4G"}
                    }
                }
            },
            "pilot": {"autoscaleEnabled": false, "traceSampling": 100},
            "kiali": {"enabled": true},
            "grafana": {"enabled": true},
            "tracing": {"enabled": true, "jaeger": {"template": "all-in-one"}}
        }
    })
}
