//! One installer per workshop subsystem, plus the builders they share.
//!
//! Every installer is a pure step-list builder over [`PlanContext`]; the
//! default [`Installer::install`] runs that list through the step executor.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use workshop_core::{labels, ManagedResource, ObjectRef, OperatorHubSpec};
use workshop_manifests::params::{
    Container, DeploymentParams, Meta, NamespaceParams, PolicyRule, RoleBindingParams, RoleParams,
    ServiceAccountParams, Subject, SubscriptionParams,
};

use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::installplan::INSTALL_PLAN_API_VERSION;
use crate::step::Step;

pub mod bookbag;
pub mod certmanager;
pub mod codeready;
pub mod gitea;
pub mod gitops;
pub mod istioworkspace;
pub mod nexus;
pub mod pipeline;
pub mod portal;
pub mod project;
pub mod serverless;
pub mod servicemesh;
pub mod vault;

pub use bookbag::BookbagInstaller;
pub use certmanager::CertManagerInstaller;
pub use codeready::CodeReadyInstaller;
pub use gitea::GiteaInstaller;
pub use gitops::GitOpsInstaller;
pub use istioworkspace::IstioWorkspaceInstaller;
pub use nexus::NexusInstaller;
pub use pipeline::PipelineInstaller;
pub use portal::PortalInstaller;
pub use project::ProjectInstaller;
pub use serverless::ServerlessInstaller;
pub use servicemesh::ServiceMeshInstaller;
pub use vault::VaultInstaller;

/// All installers, in [`workshop_core::Component::ORDER`].
pub fn default_installers() -> Vec<Box<dyn Installer>> {
    vec![
        Box::new(PortalInstaller),
        Box::new(ProjectInstaller),
        Box::new(BookbagInstaller),
        Box::new(NexusInstaller),
        Box::new(PipelineInstaller),
        Box::new(GiteaInstaller),
        Box::new(GitOpsInstaller),
        Box::new(CodeReadyInstaller),
        Box::new(ServiceMeshInstaller),
        Box::new(ServerlessInstaller),
        Box::new(VaultInstaller),
        Box::new(CertManagerInstaller),
        Box::new(IstioWorkspaceInstaller),
    ]
}

// ---------------------------------------------------------------------------
// Names and labels
// ---------------------------------------------------------------------------

pub const INFRA_NAMESPACE: &str = "workshop-infra";
pub const OPERATORS_NAMESPACE: &str = "openshift-operators";
pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";

pub const REDHAT_CATALOG: &str = "redhat-operators";
pub const CERTIFIED_CATALOG: &str = "certified-operators";
pub const COMMUNITY_CATALOG: &str = "community-operators";

/// The Argo CD application controller acts in user projects under this name.
pub const ARGOCD_CONTROLLER_USER: &str =
    "system:serviceaccount:argocd:argocd-argocd-application-controller";

const PART_OF: &str = "app.kubernetes.io/part-of";

pub(crate) fn part_of(system: &str) -> BTreeMap<String, String> {
    labels(&[(PART_OF, system)])
}

pub(crate) fn app_labels(app: &str, system: &str) -> BTreeMap<String, String> {
    labels(&[("app", app), (PART_OF, system)])
}

pub(crate) fn user_name(index: usize) -> String {
    format!("user{index}")
}

/// Per-user loops run `1..=users`; pruning starts right above.
pub(crate) fn prune_start(users: usize) -> usize {
    users + 1
}

// ---------------------------------------------------------------------------
// Shared builders
// ---------------------------------------------------------------------------

pub(crate) fn namespace(
    ctx: &PlanContext<'_>,
    name: &str,
    labels: BTreeMap<String, String>,
) -> Result<Step, ConvergeError> {
    let ns = ctx.manifests.build(&NamespaceParams {
        meta: Meta::cluster(name).with_labels(labels),
    })?;
    Ok(Step::Apply(ns))
}

pub(crate) fn subscription_ref(namespace: &str, package: &str) -> ObjectRef {
    ObjectRef::namespaced(INSTALL_PLAN_API_VERSION, "Subscription", namespace, package)
}

/// A catalog operator: its subscription and approval of its install plan.
pub(crate) struct Operator<'a> {
    pub package: &'a str,
    pub namespace: &'a str,
    pub catalog: &'a str,
    pub hub: &'a OperatorHubSpec,
}

impl Operator<'_> {
    pub fn steps(&self, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let meta = Meta::namespaced(self.namespace, self.package).with_labels(labels(&[
            ("csc-owner-name", self.catalog),
            ("csc-owner-namespace", MARKETPLACE_NAMESPACE),
        ]));
        let version = self.hub.cluster_service_version.as_str();
        let sub = ctx.manifests.build(&SubscriptionParams {
            meta,
            package: self.package.to_string(),
            channel: self.hub.channel.clone(),
            catalog: self.catalog.to_string(),
            starting_csv: (!version.is_empty()).then(|| version.to_string()),
        })?;
        Ok(vec![
            Step::Apply(sub),
            Step::approve(subscription_ref(self.namespace, self.package), version),
        ])
    }
}

pub(crate) fn custom_resource(
    ctx: &PlanContext<'_>,
    meta: Meta,
    api_version: &str,
    kind: &str,
    spec: Value,
) -> Result<ManagedResource, ConvergeError> {
    Ok(ctx.manifests.build(&workshop_manifests::params::CustomResourceParams {
        meta,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        spec,
    })?)
}

/// An in-cluster ansible operator: service account, cluster-wide RBAC, the
/// operator deployment and a gate on its rollout.
pub(crate) struct AnsibleOperator<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub image: String,
    pub system: &'a str,
    /// API group of the custom resources it reconciles.
    pub group: &'a str,
}

impl AnsibleOperator<'_> {
    pub fn steps(&self, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let meta = || Meta::namespaced(self.namespace, self.name).with_labels(part_of(self.system));

        let sa = ctx.manifests.build(&ServiceAccountParams { meta: meta() })?;
        let role = ctx.manifests.build(&RoleParams {
            meta: Meta::cluster(self.name).with_labels(part_of(self.system)),
            cluster_scoped: true,
            rules: vec![
                PolicyRule::new(
                    &[""],
                    &[
                        "pods",
                        "services",
                        "endpoints",
                        "persistentvolumeclaims",
                        "events",
                        "configmaps",
                        "secrets",
                        "serviceaccounts",
                    ],
                    &["*"],
                ),
                PolicyRule::new(&["apps"], &["deployments", "replicasets", "statefulsets"], &["*"]),
                PolicyRule::new(&["route.openshift.io"], &["routes", "routes/custom-host"], &["*"]),
                PolicyRule::new(&["monitoring.coreos.com"], &["servicemonitors"], &["get", "create"]),
                PolicyRule::new(&[self.group], &["*"], &["*"]),
            ],
        })?;
        let binding = ctx.manifests.build(&RoleBindingParams::cluster(
            Meta::cluster(self.name).with_labels(part_of(self.system)),
            self.name,
            vec![Subject::service_account(self.namespace, self.name)],
        ))?;

        let container = Container::new(self.name, self.image.clone())
            .pull_always()
            .env("WATCH_NAMESPACE", "")
            .env("OPERATOR_NAME", self.name)
            .env("ANSIBLE_GATHERING", "explicit")
            .mount("runner", "/tmp/ansible-operator/runner");
        let mut params = DeploymentParams::single(meta(), labels(&[("name", self.name)]), container);
        params.service_account = Some(self.name.to_string());
        params.volumes = vec![json!({"name": "runner", "emptyDir": {}})];
        let deployment = ctx.manifests.build(&params)?;

        Ok(vec![
            Step::Apply(sa),
            Step::Apply(role),
            Step::Apply(binding),
            Step::Apply(deployment),
            Step::await_rollout(ObjectRef::deployment(self.namespace, self.name)),
        ])
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use workshop_core::{RoutingContext, Workshop, WorkshopSpec};
    use workshop_manifests::Manifests;

    use crate::installer::{Installer, PlanContext};
    use crate::step::Step;

    pub fn routing() -> RoutingContext {
        RoutingContext::from_console_host("console-openshift-console.apps.test.example.com")
            .expect("routing")
    }

    pub fn workshop(users: i64, edit: impl FnOnce(&mut WorkshopSpec)) -> Workshop {
        let mut spec = WorkshopSpec::default();
        spec.user.number = users;
        spec.user.password = "openshift".to_string();
        spec.infrastructure.project.staging_name = "cn-project".to_string();
        edit(&mut spec);
        Workshop::new("ocp-dev", spec)
    }

    pub fn plan(installer: &dyn Installer, workshop: &Workshop) -> Vec<Step> {
        let manifests = Manifests::embedded().expect("manifests");
        let routing = routing();
        let ctx = PlanContext {
            users: workshop.spec.user_count(),
            routing: &routing,
            manifests: &manifests,
        };
        installer.plan(workshop, &ctx).expect("plan")
    }

    /// `Kind/namespace/name` of every resource the steps apply.
    pub fn applied(steps: &[Step]) -> Vec<String> {
        steps
            .iter()
            .filter_map(Step::resource)
            .map(|res| res.object_ref().to_string())
            .collect()
    }

    pub fn find<'a>(steps: &'a [Step], reference: &str) -> &'a workshop_core::ManagedResource {
        steps
            .iter()
            .filter_map(Step::resource)
            .find(|res| res.object_ref().to_string() == reference)
            .unwrap_or_else(|| panic!("{reference} not in plan"))
    }
}
