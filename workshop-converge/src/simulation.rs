//! Simulated cluster behaviour for [`crate::memory::MemoryStore`].
//!
//! Stands in for the controllers a real cluster runs: workloads roll out,
//! the operator catalog resolves subscriptions into install plans, and
//! operators materialise the workloads their custom resources describe.

use std::time::Duration;

use serde_json::json;

use workshop_core::{labels, ManagedResource, ObjectRef};

pub const SIM_CONSOLE_HOST: &str = "console-openshift-console.apps.sim.example.com";
pub const SIM_APPS_SUFFIX: &str = "apps.sim.example.com";

/// What makes a [`SpawnRule`] fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// An object of `kind` named `name` was created.
    Created { kind: String, name: String },
    /// The install plan of subscription `subscription` was approved.
    PlanApproved { subscription: String },
}

impl Trigger {
    pub fn created(kind: &str, name: &str) -> Self {
        Trigger::Created {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn plan_approved(subscription: &str) -> Self {
        Trigger::PlanApproved {
            subscription: subscription.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRule {
    pub trigger: Trigger,
    pub resources: Vec<ManagedResource>,
}

#[derive(Debug, Clone)]
pub struct Simulation {
    /// Time between a workload's creation and `status.readyReplicas` catching
    /// up with `spec.replicas`. Zero means ready on create.
    pub rollout_delay: Duration,
    pub console_host: String,
    pub rules: Vec<SpawnRule>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::openshift()
    }
}

impl Simulation {
    /// The operators every workshop component depends on.
    pub fn openshift() -> Self {
        let gitea_route = {
            let mut route = ManagedResource::new("route.openshift.io/v1", "Route", "gitea-server", Some("gitea"));
            route.set_pointer("/spec/host", json!(format!("gitea-server-gitea.{SIM_APPS_SUFFIX}")));
            route.set_pointer("/spec/to", json!({"kind": "Service", "name": "gitea-server"}));
            route
        };

        Self {
            rollout_delay: Duration::ZERO,
            console_host: SIM_CONSOLE_HOST.to_string(),
            rules: vec![
                SpawnRule {
                    trigger: Trigger::created("Gitea", "gitea-server"),
                    resources: vec![workload("gitea", "gitea-server"), gitea_route],
                },
                SpawnRule {
                    trigger: Trigger::created("ArgoCD", "argocd"),
                    resources: vec![workload("argocd", "argocd-server")],
                },
                SpawnRule {
                    trigger: Trigger::plan_approved("openshift-gitops-operator"),
                    resources: vec![workload("openshift-operators", "gitops-operator-controller-manager")],
                },
                SpawnRule {
                    trigger: Trigger::plan_approved("servicemeshoperator"),
                    resources: vec![workload("openshift-operators", "istio-operator")],
                },
                SpawnRule {
                    trigger: Trigger::plan_approved("codeready-workspaces"),
                    resources: vec![workload("workspaces", "codeready-operator")],
                },
            ],
        }
    }

    pub fn with_rollout_delay(mut self, delay: Duration) -> Self {
        self.rollout_delay = delay;
        self
    }

    pub fn with_rule(mut self, rule: SpawnRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Objects that exist before anything reconciles.
    pub fn seed_objects(&self) -> Vec<ManagedResource> {
        let mut console = ManagedResource::new(
            "route.openshift.io/v1",
            "Route",
            workshop_core::routing::CONSOLE_ROUTE_NAME,
            Some(workshop_core::routing::CONSOLE_ROUTE_NAMESPACE),
        );
        console.set_pointer("/spec/host", json!(self.console_host));

        let mut scc = ManagedResource::new(
            "security.openshift.io/v1",
            "SecurityContextConstraints",
            "privileged",
            None,
        );
        scc.set_pointer("/users", json!(["system:admin"]));
        vec![console, scc]
    }

    pub(crate) fn spawned_by(&self, trigger: &Trigger) -> Vec<ManagedResource> {
        self.rules
            .iter()
            .filter(|rule| &rule.trigger == trigger)
            .flat_map(|rule| rule.resources.iter().cloned())
            .collect()
    }
}

/// Workloads whose `status.readyReplicas` the simulation drives.
pub(crate) fn is_workload(target: &ObjectRef) -> bool {
    target.api_version == "apps/v1" && matches!(target.kind.as_str(), "Deployment" | "StatefulSet")
}

fn workload(namespace: &str, name: &str) -> ManagedResource {
    let mut dep = ManagedResource::new("apps/v1", "Deployment", name, Some(namespace));
    dep.metadata.labels = labels(&[("name", name)]);
    dep.set_pointer("/spec/replicas", json!(1));
    dep.set_pointer("/spec/selector/matchLabels", json!({ "name": name }));
    dep
}
