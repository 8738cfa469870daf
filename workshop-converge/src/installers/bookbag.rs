//! Per-user lab guides served by bookbag.

use std::collections::BTreeMap;

use serde_json::json;

use workshop_core::{Component, RoutingContext, Workshop};
use workshop_manifests::params::{
    ConfigMapParams, Container, ContainerPort, DeploymentParams, EnvVar, Meta, RoleBindingParams, RouteParams,
    ServiceAccountParams, ServiceParams, ServicePort, Subject,
};

use super::{app_labels, namespace, part_of, prune_start, user_name};
use crate::applier::OwnedFields;
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::{IndexedRef, PruneSpec, Step};

pub const GUIDES_NAMESPACE: &str = "workshop-guides";
const SYSTEM: &str = "bookbag";
const PORT: u16 = 10080;

pub struct BookbagInstaller;

impl Installer for BookbagInstaller {
    fn component(&self) -> Component {
        Component::Bookbag
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut steps = vec![namespace(ctx, GUIDES_NAMESPACE, part_of(SYSTEM))?];
        for index in 1..=ctx.users {
            steps.extend(user_steps(workshop, ctx, index)?);
        }
        steps.push(Step::Prune(prune_spec(ctx.users)));
        Ok(steps)
    }
}

/// Variables the guide content substitutes into its pages.
fn workshop_vars(workshop: &Workshop, routing: &RoutingContext, index: usize) -> BTreeMap<String, String> {
    let spec = &workshop.spec;
    BTreeMap::from([
        ("APPS_HOSTNAME_SUFFIX".to_string(), routing.apps_suffix.clone()),
        ("OPENSHIFT_CONSOLE_URL".to_string(), routing.console_url.clone()),
        ("OPENSHIFT_PASSWORD".to_string(), spec.user.password.clone()),
        ("USER_ID".to_string(), index.to_string()),
        ("WORKSHOP_GIT_REPO".to_string(), spec.source.git_url.clone()),
        ("WORKSHOP_GIT_REF".to_string(), spec.source.git_branch.clone()),
    ])
}

fn user_steps(workshop: &Workshop, ctx: &PlanContext<'_>, index: usize) -> Result<Vec<Step>, ConvergeError> {
    let name = format!("{}-bookbag", user_name(index));
    let meta = |resource: &str| Meta::namespaced(GUIDES_NAMESPACE, resource).with_labels(app_labels(&name, SYSTEM));
    let vars = workshop_vars(workshop, ctx.routing, index);

    let vars_json = serde_json::to_string(&vars)
        .map_err(|err| ConvergeError::InvalidConfig(format!("workshop variables: {err}")))?;
    let env_cm = ctx.manifests.build(&ConfigMapParams {
        meta: meta(&format!("{name}-env")),
        data: BTreeMap::from([
            ("gateway.sh".to_string(), String::new()),
            ("terminal.sh".to_string(), String::new()),
            ("workshop.sh".to_string(), String::new()),
            ("WORKSHOP_VARS".to_string(), vars_json),
        ]),
    })?;
    let vars_cm = ctx.manifests.build(&ConfigMapParams {
        meta: meta(&format!("{name}-vars")),
        data: vars.clone(),
    })?;

    let sa = ctx.manifests.build(&ServiceAccountParams { meta: meta(&name) })?;
    let binding = ctx.manifests.build(&RoleBindingParams::to_cluster_role(
        meta(&format!("{name}-admin")),
        "admin",
        vec![Subject::service_account(GUIDES_NAMESPACE, &name)],
    ))?;

    let mut container = Container::new("terminal", workshop.spec.infrastructure.guide.bookbag.image.reference())
        .pull_always()
        .port(ContainerPort::tcp(PORT))
        .env("APPLICATION_NAME", &name)
        .env("AUTH_USERNAME", "*")
        .env("AUTH_PASSWORD", "")
        .env("CLUSTER_SUBDOMAIN", &ctx.routing.apps_suffix)
        .env("OAUTH_SERVICE_ACCOUNT", &name)
        .env("WORKSHOP_ENVVARS", "/var/run/workshop/envvars")
        .mount("envvars", "/var/run/workshop");
    container.env.extend(vars.iter().map(|(k, v)| EnvVar::new(k, v)));
    let mut params = DeploymentParams::single(meta(&name), app_labels(&name, SYSTEM), container);
    params.service_account = Some(name.clone());
    params.volumes = vec![json!({
        "name": "envvars",
        "configMap": {"name": format!("{name}-env"), "defaultMode": 0o755}
    })];
    let deployment = ctx.manifests.build(&params)?;

    let service = ctx.manifests.build(&ServiceParams {
        meta: meta(&name),
        cluster_ip: None,
        selector: app_labels(&name, SYSTEM),
        ports: vec![ServicePort::tcp("10080-tcp", PORT, PORT)],
    })?;
    let route = ctx.manifests.build(&RouteParams {
        meta: meta(&name),
        host: Some(ctx.routing.app_host(&format!("{name}-{GUIDES_NAMESPACE}"))),
        service: name.clone(),
        target_port: json!("10080-tcp"),
        tls: false,
    })?;

    Ok(vec![
        Step::ApplyWithUpdate(env_cm, OwnedFields::exact(&["/data"])),
        Step::Apply(vars_cm),
        Step::Apply(sa),
        Step::Apply(binding),
        Step::ApplyWithUpdate(
            deployment,
            OwnedFields::exact(&["/spec/template/spec/containers/0/env"]),
        ),
        Step::Apply(service),
        Step::Apply(route),
    ])
}

fn prune_spec(users: usize) -> PruneSpec {
    let target = |api: &str, kind: &str, name: &str| IndexedRef::namespaced(api, kind, GUIDES_NAMESPACE, name);
    PruneSpec {
        start: prune_start(users),
        marker: target("apps/v1", "Deployment", "user{i}-bookbag"),
        targets: vec![
            target("route.openshift.io/v1", "Route", "user{i}-bookbag"),
            target("v1", "Service", "user{i}-bookbag"),
            target("rbac.authorization.k8s.io/v1", "RoleBinding", "user{i}-bookbag-admin"),
            target("v1", "ServiceAccount", "user{i}-bookbag"),
            target("v1", "ConfigMap", "user{i}-bookbag-vars"),
            target("v1", "ConfigMap", "user{i}-bookbag-env"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{applied, find, plan, workshop};
    use workshop_core::ImageSpec;

    fn bookbag_workshop(users: i64) -> Workshop {
        workshop(users, |spec| {
            spec.infrastructure.guide.bookbag.enabled = true;
            spec.infrastructure.guide.bookbag.image = ImageSpec::new("quay.io/mcouliba/bookbag", "1.0");
            spec.source.git_url = "https://github.com/mcouliba/cloud-native-workshop".into();
            spec.source.git_branch = "ocp-4.5".into();
        })
    }

    #[test]
    fn per_user_guides() {
        let refs = applied(&plan(&BookbagInstaller, &bookbag_workshop(2)));
        assert_eq!(refs[0], "Namespace/workshop-guides");
        for i in 1..=2 {
            assert!(refs.contains(&format!("Deployment/workshop-guides/user{i}-bookbag")));
            assert!(refs.contains(&format!("ConfigMap/workshop-guides/user{i}-bookbag-env")));
            assert!(refs.contains(&format!("Route/workshop-guides/user{i}-bookbag")));
        }
        assert!(!refs.iter().any(|r| r.contains("user3")));
    }

    #[test]
    fn route_host_matches_portal_module_url() {
        let steps = plan(&BookbagInstaller, &bookbag_workshop(1));
        let route = find(&steps, "Route/workshop-guides/user1-bookbag");
        assert_eq!(
            route.pointer_str("/spec/host"),
            Some("user1-bookbag-workshop-guides.apps.test.example.com")
        );
    }

    #[test]
    fn vars_carry_source_and_user() {
        let steps = plan(&BookbagInstaller, &bookbag_workshop(2));
        let vars = find(&steps, "ConfigMap/workshop-guides/user2-bookbag-vars");
        assert_eq!(vars.pointer_str("/data/USER_ID"), Some("2"));
        assert_eq!(vars.pointer_str("/data/WORKSHOP_GIT_REF"), Some("ocp-4.5"));
        let env = find(&steps, "ConfigMap/workshop-guides/user2-bookbag-env");
        let encoded = env.pointer_str("/data/WORKSHOP_VARS").expect("vars");
        assert!(encoded.contains("\"OPENSHIFT_PASSWORD\":\"openshift\""), "{encoded}");
    }

    #[test]
    fn prune_keys_on_the_deployment_and_deletes_it_last() {
        let spec = prune_spec(2);
        assert_eq!(spec.start, 3);
        let marker = spec.marker.resolve(3);
        assert_eq!((marker.kind.as_str(), marker.name.as_str()), ("Deployment", "user3-bookbag"));
        assert!(spec.targets.iter().all(|t| t.kind != "Deployment"));
    }
}
