//! OpenShift GitOps (Argo CD) with one project and role per user.

use std::collections::BTreeMap;

use serde_json::json;

use workshop_core::{labels, Component, ObjectRef, Workshop};
use workshop_manifests::params::{
    ConfigMapParams, Meta, PolicyRule, RoleBindingParams, RoleParams, SecretParams, Subject,
};

use super::{
    custom_resource, namespace, user_name, Operator, ARGOCD_CONTROLLER_USER, OPERATORS_NAMESPACE,
    REDHAT_CATALOG,
};
use crate::applier::OwnedFields;
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

pub const ARGOCD_NAMESPACE: &str = "argocd";
const SYSTEM: &str = "argocd";
const ARGO_API: &str = "argoproj.io/v1alpha1";
const IN_CLUSTER: &str = "https://kubernetes.default.svc";
const GITEA_REPOS: &str = "http://gitea-server.gitea.svc:3000";

pub struct GitOpsInstaller;

impl Installer for GitOpsInstaller {
    fn component(&self) -> Component {
        Component::GitOps
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut steps = Operator {
            package: "openshift-gitops-operator",
            namespace: OPERATORS_NAMESPACE,
            catalog: REDHAT_CATALOG,
            hub: &workshop.spec.infrastructure.gitops.operator_hub,
        }
        .steps(ctx)?;
        steps.push(Step::await_rollout(ObjectRef::deployment(
            OPERATORS_NAMESPACE,
            "gitops-operator-controller-manager",
        )));
        steps.push(namespace(ctx, ARGOCD_NAMESPACE, argo_labels(ARGOCD_NAMESPACE))?);

        // Without staging projects there is nothing per user to delegate.
        let projects: Vec<String> = if workshop.spec.infrastructure.project.staging_name.is_empty() {
            vec![]
        } else {
            (1..=ctx.users).map(|i| workshop.spec.staging_namespace(i)).collect()
        };
        for (index, project) in (1..=ctx.users).zip(&projects) {
            steps.extend(user_steps(ctx, index, project)?);
        }

        let secret = ctx.manifests.build(&SecretParams::opaque(
            Meta::namespaced(ARGOCD_NAMESPACE, "argocd-secret").with_labels(argo_labels("argocd-secret")),
            BTreeMap::new(),
        ))?;
        steps.push(Step::Apply(secret));

        let accounts = (1..=ctx.users)
            .map(|i| (format!("accounts.{}", user_name(i)), "login".to_string()))
            .collect();
        let config = ctx.manifests.build(&ConfigMapParams {
            meta: Meta::namespaced(ARGOCD_NAMESPACE, "argocd-cm").with_labels(argo_labels("argocd-cm")),
            data: accounts,
        })?;
        steps.push(Step::ApplyWithUpdate(config, OwnedFields::intersect(&["/data"])));

        let argocd = custom_resource(
            ctx,
            Meta::namespaced(ARGOCD_NAMESPACE, "argocd").with_labels(argo_labels("argocd")),
            ARGO_API,
            "ArgoCD",
            json!({
                "applicationInstanceLabelKey": "argocd.argoproj.io/instance",
                "dex": {"openShiftOAuth": true},
                "server": {"insecure": true, "route": {"enabled": true}},
                "rbac": {
                    "defaultPolicy": "",
                    "policy": rbac_policy(&projects),
                    "scopes": "[preferred_username]"
                }
            }),
        )?;
        steps.push(Step::ApplyWithUpdate(argocd, OwnedFields::exact(&["/spec/rbac/policy"])));
        steps.push(Step::await_rollout(ObjectRef::deployment(ARGOCD_NAMESPACE, "argocd-server")));

        let mut cluster_labels = argo_labels("argocd-default-cluster-config");
        cluster_labels.insert("argocd.argoproj.io/secret-type".into(), "cluster".into());
        let cluster = ctx.manifests.build(&SecretParams::opaque(
            Meta::namespaced(ARGOCD_NAMESPACE, "argocd-default-cluster-config").with_labels(cluster_labels),
            BTreeMap::from([
                ("config".to_string(), r#"{"tlsClientConfig":{"insecure":false}}"#.to_string()),
                ("name".to_string(), "in-cluster".to_string()),
                ("namespaces".to_string(), projects.join(",")),
                ("server".to_string(), IN_CLUSTER.to_string()),
            ]),
        ))?;
        steps.push(Step::ApplyWithUpdate(cluster, OwnedFields::intersect(&["/stringData"])));
        Ok(steps)
    }
}

fn argo_labels(name: &str) -> BTreeMap<String, String> {
    labels(&[("app.kubernetes.io/name", name), ("app.kubernetes.io/part-of", SYSTEM)])
}

/// Casbin policy granting each user their own project, in user order.
pub fn rbac_policy(projects: &[String]) -> String {
    let mut lines = Vec::new();
    for (index, project) in (1..).zip(projects) {
        let user = user_name(index);
        lines.push(format!("p, role:{user}, applications, *, {project}/*, allow"));
        lines.push(format!("p, role:{user}, clusters, get, {IN_CLUSTER}, allow"));
        lines.push(format!("p, role:{user}, projects, *,{project}, allow"));
        lines.push(format!("p, role:{user}, repositories, *, {GITEA_REPOS}/{user}/*, allow"));
        lines.push(format!("g, {user}, role:{user}"));
    }
    lines.join("\n")
}

fn user_steps(ctx: &PlanContext<'_>, index: usize, project: &str) -> Result<Vec<Step>, ConvergeError> {
    let user = user_name(index);
    let app_project = custom_resource(
        ctx,
        Meta::namespaced(ARGOCD_NAMESPACE, project).with_labels(argo_labels(project)),
        ARGO_API,
        "AppProject",
        json!({
            "description": format!("{user} project"),
            "destinations": [{"namespace": project, "server": IN_CLUSTER}],
            "sourceRepos": [format!("{GITEA_REPOS}/{user}/*")],
            "clusterResourceWhitelist": [],
            "namespaceResourceBlacklist": [
                {"group": "", "kind": "ResourceQuota"},
                {"group": "", "kind": "LimitRange"}
            ]
        }),
    )?;

    let role = ctx.manifests.build(&RoleParams {
        meta: Meta::namespaced(project, "argocd-manager").with_labels(argo_labels("argocd-manager")),
        cluster_scoped: false,
        rules: vec![PolicyRule::new(&["*"], &["*"], &["*"])],
    })?;
    let binding = ctx.manifests.build(&RoleBindingParams::to_role(
        Meta::namespaced(project, "argocd-manager").with_labels(argo_labels("argocd-manager")),
        "argocd-manager",
        vec![Subject::user(ARGOCD_CONTROLLER_USER)],
    ))?;

    Ok(vec![
        Step::ApplyWithUpdate(app_project, OwnedFields::exact(&["/spec"])),
        Step::ApplyWithUpdate(role, OwnedFields::exact(&["/rules"])),
        Step::ApplyWithUpdate(binding, OwnedFields::exact(&["/subjects"])),
    ])
}
