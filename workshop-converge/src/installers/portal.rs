//! Username-distribution portal and its redis backing store.

use std::collections::BTreeMap;

use serde_json::json;

use workshop_core::{Component, ObjectRef, Workshop};
use workshop_manifests::params::{
    Container, ContainerPort, DeploymentParams, Meta, PersistentVolumeClaimParams, RouteParams,
    SecretParams, ServiceParams, ServicePort,
};

use super::{app_labels, namespace, part_of, INFRA_NAMESPACE};
use crate::applier::OwnedFields;
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

const SYSTEM: &str = "portal";
const REDIS_IMAGE: &str = "image-registry.openshift-image-registry.svc:5000/openshift/redis:5";
const REDIS_PASSWORD: &str = "redis";
const PORTAL_IMAGE: &str = "quay.io/mcouliba/username-distribution:1.3";
const ADMIN_PASSWORD: &str = "r3dh4t1!";

const CONTAINER_ENV: &str = "/spec/template/spec/containers/0/env";
const CONTAINER_IMAGE: &str = "/spec/template/spec/containers/0/image";

pub struct PortalInstaller;

impl Installer for PortalInstaller {
    fn component(&self) -> Component {
        Component::Portal
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut steps = vec![namespace(ctx, INFRA_NAMESPACE, part_of(SYSTEM))?];
        steps.extend(redis_steps(ctx)?);
        steps.extend(portal_steps(workshop, ctx)?);
        Ok(steps)
    }
}

fn redis_steps(ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
    let meta = |name: &str| Meta::namespaced(INFRA_NAMESPACE, name).with_labels(app_labels("redis", SYSTEM));

    let secret = ctx.manifests.build(&SecretParams::opaque(
        meta("redis"),
        BTreeMap::from([("database-password".to_string(), REDIS_PASSWORD.to_string())]),
    ))?;
    let pvc = ctx.manifests.build(&PersistentVolumeClaimParams {
        meta: meta("redis"),
        storage: "512Mi".to_string(),
    })?;

    let mut container = Container::new("redis", REDIS_IMAGE)
        .secret_env("REDIS_PASSWORD", "redis", "database-password")
        .port(ContainerPort::tcp(6379))
        .mount("redis-data", "/var/lib/redis/data");
    container.resources = Some(json!({
        "requests": {"memory": "512Mi"},
        "limits": {"memory": "512Mi"}
    }));
    container.readiness_probe = Some(json!({
        "exec": {
            "command": [
                "/bin/sh",
                "-i",
                "-c",
                "test \"$(redis-cli -h 127.0.0.1 -a $REDIS_PASSWORD ping)\" == \"PONG\""
            ]
        },
        "initialDelaySeconds": 5,
        "failureThreshold": 10,
        "timeoutSeconds": 1
    }));
    let mut params = DeploymentParams::single(meta("redis"), app_labels("redis", SYSTEM), container);
    params.volumes = vec![json!({
        "name": "redis-data",
        "persistentVolumeClaim": {"claimName": "redis"}
    })];
    let deployment = ctx.manifests.build(&params)?;

    let service = ctx.manifests.build(&ServiceParams {
        meta: meta("redis"),
        cluster_ip: None,
        selector: app_labels("redis", SYSTEM),
        ports: vec![ServicePort::tcp("6379-tcp", 6379, 6379)],
    })?;

    Ok(vec![
        Step::Apply(secret),
        Step::Apply(pvc),
        Step::ApplyWithUpdate(deployment, OwnedFields::exact(&[CONTAINER_ENV])),
        Step::Apply(service),
        Step::await_rollout(ObjectRef::deployment(INFRA_NAMESPACE, "redis")),
    ])
}

/// `url;label` pairs, separated by commas.
fn module_urls(workshop: &Workshop, ctx: &PlanContext<'_>) -> String {
    let mut urls = vec![format!(
        "http://%USERNAME%-bookbag-workshop-guides.{}/workshop;{}",
        ctx.routing.apps_suffix, workshop.metadata.name
    )];
    let scholars = &workshop.spec.infrastructure.guide.scholars;
    if scholars.enabled {
        urls.extend(scholars.guide_url.iter().map(|(module, url)| format!("{url};{module}")));
    }
    urls.join(",")
}

fn portal_steps(workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
    let meta = || Meta::namespaced(INFRA_NAMESPACE, "portal").with_labels(app_labels("portal", SYSTEM));
    let password = workshop.spec.user.password.as_str();

    let container = Container::new("portal", PORTAL_IMAGE)
        .pull_always()
        .port(ContainerPort::tcp(8080))
        .env("LAB_REDIS_HOST", "redis")
        .env("LAB_REDIS_PASS", REDIS_PASSWORD)
        .env("LAB_TITLE", "OpenShift Workshops")
        .env("LAB_DURATION_HOURS", "1week")
        .env("LAB_USER_COUNT", ctx.users.to_string())
        .env("LAB_USER_ACCESS_TOKEN", password)
        .env("LAB_USER_PASS", password)
        .env("LAB_USER_PREFIX", "user")
        .env("LAB_USER_PAD_ZERO", "false")
        .env("LAB_ADMIN_PASS", ADMIN_PASSWORD)
        .env("LAB_MODULE_URLS", module_urls(workshop, ctx))
        .env("LAB_EXTRA_URLS", format!("{};OpenShift Console", ctx.routing.console_url));
    let deployment = ctx.manifests.build(&DeploymentParams::single(
        meta(),
        app_labels("portal", SYSTEM),
        container,
    ))?;

    let service = ctx.manifests.build(&ServiceParams {
        meta: meta(),
        cluster_ip: None,
        selector: app_labels("portal", SYSTEM),
        ports: vec![ServicePort::tcp("8080-tcp", 8080, 8080)],
    })?;
    let route = ctx.manifests.build(&RouteParams {
        meta: meta(),
        host: None,
        service: "portal".to_string(),
        target_port: json!("8080-tcp"),
        tls: true,
    })?;

    Ok(vec![
        Step::ApplyWithUpdate(deployment, OwnedFields::exact(&[CONTAINER_ENV, CONTAINER_IMAGE])),
        Step::Apply(service),
        Step::Apply(route),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{applied, find, plan, workshop};
    use serde_json::Value;

    fn env_value<'a>(deployment: &'a workshop_core::ManagedResource, name: &str) -> Option<&'a str> {
        deployment
            .pointer(CONTAINER_ENV)?
            .as_array()?
            .iter()
            .find(|e| e["name"] == name)?
            .get("value")
            .and_then(Value::as_str)
    }

    #[test]
    fn namespace_first_then_redis_before_portal() {
        let steps = plan(&PortalInstaller, &workshop(2, |_| {}));
        let refs = applied(&steps);
        assert_eq!(refs[0], "Namespace/workshop-infra");
        let redis = refs.iter().position(|r| r == "Deployment/workshop-infra/redis").expect("redis");
        let portal = refs.iter().position(|r| r == "Deployment/workshop-infra/portal").expect("portal");
        assert!(redis < portal);
        assert!(steps
            .iter()
            .any(|s| matches!(s, Step::AwaitReady { target, .. } if target.name == "redis")));
    }

    #[test]
    fn portal_env_reflects_users_and_routing() {
        let steps = plan(&PortalInstaller, &workshop(7, |_| {}));
        let portal = find(&steps, "Deployment/workshop-infra/portal");
        assert_eq!(env_value(portal, "LAB_USER_COUNT"), Some("7"));
        assert_eq!(env_value(portal, "LAB_USER_PASS"), Some("openshift"));
        assert_eq!(
            env_value(portal, "LAB_EXTRA_URLS"),
            Some("https://console-openshift-console.apps.test.example.com;OpenShift Console")
        );
        assert_eq!(
            env_value(portal, "LAB_MODULE_URLS"),
            Some("http://%USERNAME%-bookbag-workshop-guides.apps.test.example.com/workshop;ocp-dev")
        );
    }

    #[test]
    fn scholars_guides_are_published() {
        let ws = workshop(1, |spec| {
            spec.infrastructure.guide.scholars.enabled = true;
            spec.infrastructure
                .guide
                .scholars
                .guide_url
                .insert("mesh".into(), "https://guides.example.com/mesh".into());
        });
        let steps = plan(&PortalInstaller, &ws);
        let urls = env_value(find(&steps, "Deployment/workshop-infra/portal"), "LAB_MODULE_URLS")
            .expect("module urls")
            .to_string();
        assert!(urls.ends_with(",https://guides.example.com/mesh;mesh"), "{urls}");
    }

    #[test]
    fn redis_password_comes_from_secret() {
        let steps = plan(&PortalInstaller, &workshop(1, |_| {}));
        let redis = find(&steps, "Deployment/workshop-infra/redis");
        let env = &redis.pointer(CONTAINER_ENV).expect("env")[0];
        assert_eq!(env["valueFrom"]["secretKeyRef"]["name"], "redis");
        assert_eq!(env["valueFrom"]["secretKeyRef"]["key"], "database-password");
    }
}
