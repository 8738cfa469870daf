//! HashiCorp Vault server (file storage, single replica) and its agent
//! injector webhook.

use std::collections::BTreeMap;

use serde_json::json;

use workshop_core::{labels, Component, ObjectRef, Workshop};
use workshop_manifests::params::{
    ConfigMapParams, Container, ContainerPort, DeploymentParams, EnvVar, Meta, MutatingWebhookParams,
    PolicyRule, RoleBindingParams, RoleParams, ServiceAccountParams, ServiceParams, ServicePort,
    StatefulSetParams, Subject,
};
use workshop_manifests::VAULT_CONFIG;

use super::namespace;
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

pub const VAULT_NAMESPACE: &str = "vault";
const API_PORT: u16 = 8200;
const CLUSTER_PORT: u16 = 8201;
const DATA_DIR: &str = "/vault/data";
const CONFIG_FILE: &str = "extraconfig-from-values.hcl";
const INJECTOR: &str = "vault-agent-injector";
const INJECTOR_SERVICE: &str = "vault-agent-injector-svc";

pub struct VaultInstaller;

impl Installer for VaultInstaller {
    fn component(&self) -> Component {
        Component::Vault
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut steps = vec![namespace(
            ctx,
            VAULT_NAMESPACE,
            labels(&[("app.kubernetes.io/part-of", "vault")]),
        )?];
        steps.extend(server_steps(workshop, ctx)?);
        steps.extend(injector_steps(workshop, ctx)?);
        Ok(steps)
    }
}

fn vault_labels(name: &str, component: &str) -> BTreeMap<String, String> {
    labels(&[
        ("app", "vault"),
        ("app.kubernetes.io/name", name),
        ("app.kubernetes.io/part-of", "vault"),
        ("component", component),
    ])
}

fn selector(name: &str, component: &str) -> BTreeMap<String, String> {
    labels(&[("app.kubernetes.io/name", name), ("component", component)])
}

/// Grant a service account of the vault namespace the privileged SCC.
fn privileged(service_account: &str) -> Step {
    Step::EnsureListMember {
        target: ObjectRef::cluster("security.openshift.io/v1", "SecurityContextConstraints", "privileged"),
        pointer: "/users".to_string(),
        value: format!("system:serviceaccount:{VAULT_NAMESPACE}:{service_account}"),
    }
}

fn server_steps(workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
    let meta = |name: &str| Meta::namespaced(VAULT_NAMESPACE, name).with_labels(vault_labels("vault", "server"));

    let hcl = ctx.manifests.render_text(
        VAULT_CONFIG,
        &json!({"api_port": API_PORT, "cluster_port": CLUSTER_PORT, "data_dir": DATA_DIR}),
    )?;
    let config = ctx.manifests.build(&ConfigMapParams {
        meta: meta("vault-config"),
        data: BTreeMap::from([(CONFIG_FILE.to_string(), hcl)]),
    })?;
    let sa = ctx.manifests.build(&ServiceAccountParams { meta: meta("vault") })?;
    let binding = ctx.manifests.build(&RoleBindingParams::cluster(
        Meta::cluster("vault-server-binding").with_labels(vault_labels("vault", "server")),
        "system:auth-delegator",
        vec![Subject::service_account(VAULT_NAMESPACE, "vault")],
    ))?;

    let ports = || {
        vec![
            ServicePort::tcp("http", API_PORT, API_PORT),
            ServicePort::tcp("internal", CLUSTER_PORT, CLUSTER_PORT),
        ]
    };
    let internal = ctx.manifests.build(&ServiceParams {
        meta: meta("vault-internal"),
        cluster_ip: Some("None".to_string()),
        selector: selector("vault", "server"),
        ports: ports(),
    })?;
    let service = ctx.manifests.build(&ServiceParams {
        meta: meta("vault"),
        cluster_ip: None,
        selector: selector("vault", "server"),
        ports: ports(),
    })?;

    let start = format!(
        "cp /vault/config/{CONFIG_FILE} /tmp/storageconfig.hcl; \
         /usr/local/bin/docker-entrypoint.sh vault server -config=/tmp/storageconfig.hcl"
    );
    let mut container = Container::new("vault", workshop.spec.infrastructure.vault.image.reference())
        .command(&["/bin/sh", "-ec"])
        .args(&[start.as_str()])
        .env("VAULT_ADDR", format!("http://127.0.0.1:{API_PORT}"))
        .env("VAULT_API_ADDR", format!("http://$(POD_IP):{API_PORT}"))
        .env("SKIP_CHOWN", "true")
        .env("SKIP_SETCAP", "true")
        .env("HOME", "/home/vault")
        .port(ContainerPort::named(API_PORT, "http"))
        .port(ContainerPort::named(CLUSTER_PORT, "https-internal"))
        .port(ContainerPort::named(8202, "http-rep"))
        .mount("data", DATA_DIR)
        .mount("config", "/vault/config")
        .mount("home", "/home/vault");
    container.env.insert(
        0,
        EnvVar {
            name: "POD_IP".to_string(),
            value: None,
            value_from: Some(json!({"fieldRef": {"fieldPath": "status.podIP"}})),
        },
    );
    container.readiness_probe = Some(json!({
        "exec": {"command": ["/bin/sh", "-ec", "vault status -tls-skip-verify"]},
        "failureThreshold": 2,
        "initialDelaySeconds": 5,
        "periodSeconds": 5,
        "successThreshold": 1,
        "timeoutSeconds": 3
    }));

    let stateful = ctx.manifests.build(&StatefulSetParams {
        meta: meta("vault"),
        service_name: "vault-internal".to_string(),
        replicas: 1,
        selector: selector("vault", "server"),
        service_account: Some("vault".to_string()),
        containers: vec![container],
        volumes: vec![
            json!({"name": "config", "configMap": {"name": "vault-config"}}),
            json!({"name": "home", "emptyDir": {}}),
        ],
        volume_claims: vec![json!({
            "metadata": {"name": "data"},
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": {"requests": {"storage": "10Gi"}}
            }
        })],
    })?;

    Ok(vec![
        Step::Apply(config),
        Step::Apply(sa),
        privileged("vault"),
        Step::Apply(binding),
        Step::Apply(internal),
        Step::Apply(service),
        Step::Apply(stateful),
    ])
}

fn injector_steps(workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
    let vault = &workshop.spec.infrastructure.vault;
    let meta = |name: &str| Meta::namespaced(VAULT_NAMESPACE, name).with_labels(vault_labels(INJECTOR, "webhook"));
    let cluster_meta = |name: &str| Meta::cluster(name).with_labels(vault_labels(INJECTOR, "webhook"));

    let sa = ctx.manifests.build(&ServiceAccountParams { meta: meta(INJECTOR) })?;
    let role_name = format!("{INJECTOR}-clusterrole");
    let role = ctx.manifests.build(&RoleParams {
        meta: cluster_meta(&role_name),
        cluster_scoped: true,
        rules: vec![PolicyRule::new(
            &["admissionregistration.k8s.io"],
            &["mutatingwebhookconfigurations"],
            &["get", "list", "watch", "patch"],
        )],
    })?;
    let binding = ctx.manifests.build(&RoleBindingParams::cluster(
        cluster_meta(&format!("{role_name}-binding")),
        &role_name,
        vec![Subject::service_account(VAULT_NAMESPACE, INJECTOR)],
    ))?;
    let service = ctx.manifests.build(&ServiceParams {
        meta: meta(INJECTOR_SERVICE),
        cluster_ip: None,
        selector: selector(INJECTOR, "webhook"),
        ports: vec![ServicePort::tcp("https", 443, 8080)],
    })?;

    let probe = json!({
        "httpGet": {"path": "/health/ready", "port": 8080, "scheme": "HTTPS"},
        "initialDelaySeconds": 1,
        "failureThreshold": 2,
        "periodSeconds": 2,
        "successThreshold": 1,
        "timeoutSeconds": 5
    });
    let mut container = Container::new("sidecar-injector", vault.agent_injector_image.reference())
        .env("AGENT_INJECT_LISTEN", ":8080")
        .env("AGENT_INJECT_LOG_LEVEL", "info")
        .env("AGENT_INJECT_VAULT_ADDR", format!("http://vault.{VAULT_NAMESPACE}.svc:{API_PORT}"))
        .env("AGENT_INJECT_VAULT_AUTH_PATH", "auth/kubernetes")
        .env("AGENT_INJECT_VAULT_IMAGE", vault.image.reference())
        .env("AGENT_INJECT_TLS_AUTO", format!("{INJECTOR}-cfg"))
        .env(
            "AGENT_INJECT_TLS_AUTO_HOSTS",
            format!(
                "{INJECTOR_SERVICE},{INJECTOR_SERVICE}.{VAULT_NAMESPACE},{INJECTOR_SERVICE}.{VAULT_NAMESPACE}.svc"
            ),
        )
        .env("AGENT_INJECT_LOG_FORMAT", "standard")
        .env("AGENT_INJECT_REVOKE_ON_SHUTDOWN", "false")
        .args(&["agent-inject", "2>&1"]);
    container.readiness_probe = Some(probe);
    let mut params = DeploymentParams::single(meta(INJECTOR), selector(INJECTOR, "webhook"), container);
    params.service_account = Some(INJECTOR.to_string());
    let deployment = ctx.manifests.build(&params)?;

    let webhook = ctx.manifests.build(&MutatingWebhookParams {
        meta: cluster_meta(&format!("{INJECTOR}-cfg")),
        webhook_name: "vault.hashicorp.com".to_string(),
        service: INJECTOR_SERVICE.to_string(),
        service_namespace: VAULT_NAMESPACE.to_string(),
        path: "/mutate".to_string(),
    })?;

    Ok(vec![
        Step::Apply(sa),
        privileged(INJECTOR),
        Step::Apply(role),
        Step::Apply(binding),
        Step::Apply(service),
        Step::Apply(deployment),
        Step::Apply(webhook),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{applied, find, plan, workshop};
    use workshop_core::ImageSpec;

    fn vault_workshop() -> Workshop {
        workshop(1, |spec| {
            let vault = &mut spec.infrastructure.vault;
            vault.enabled = true;
            vault.image = ImageSpec::new("vault", "1.5.4");
            vault.agent_injector_image = ImageSpec::new("hashicorp/vault-k8s", "0.6.0");
        })
    }

    #[test]
    fn server_then_injector() {
        let refs = applied(&plan(&VaultInstaller, &vault_workshop()));
        assert_eq!(
            refs,
            [
                "Namespace/vault",
                "ConfigMap/vault/vault-config",
                "ServiceAccount/vault/vault",
                "ClusterRoleBinding/vault-server-binding",
                "Service/vault/vault-internal",
                "Service/vault/vault",
                "StatefulSet/vault/vault",
                "ServiceAccount/vault/vault-agent-injector",
                "ClusterRole/vault-agent-injector-clusterrole",
                "ClusterRoleBinding/vault-agent-injector-clusterrole-binding",
                "Service/vault/vault-agent-injector-svc",
                "Deployment/vault/vault-agent-injector",
                "MutatingWebhookConfiguration/vault-agent-injector-cfg",
            ]
        );
    }

    #[test]
    fn both_service_accounts_join_privileged_scc() {
        let members: Vec<String> = plan(&VaultInstaller, &vault_workshop())
            .into_iter()
            .filter_map(|s| match s {
                Step::EnsureListMember { value, pointer, .. } if pointer == "/users" => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(
            members,
            [
                "system:serviceaccount:vault:vault",
                "system:serviceaccount:vault:vault-agent-injector"
            ]
        );
    }

    #[test]
    fn config_map_holds_rendered_listener() {
        let steps = plan(&VaultInstaller, &vault_workshop());
        let config = find(&steps, "ConfigMap/vault/vault-config");
        let hcl = config.pointer_str(&format!("/data/{CONFIG_FILE}")).expect("hcl");
        assert!(hcl.contains("cluster_address = \"[::]:8201\""));
        assert!(hcl.contains("path = \"/vault/data\""));
    }

    #[test]
    fn injector_uses_images_and_webhook_targets_service() {
        let steps = plan(&VaultInstaller, &vault_workshop());
        let injector = find(&steps, "Deployment/vault/vault-agent-injector");
        assert_eq!(
            injector.pointer_str("/spec/template/spec/containers/0/image"),
            Some("hashicorp/vault-k8s:0.6.0")
        );
        let webhook = find(&steps, "MutatingWebhookConfiguration/vault-agent-injector-cfg");
        assert_eq!(
            webhook.pointer_str("/webhooks/0/clientConfig/service/name"),
            Some(INJECTOR_SERVICE)
        );
        let service = find(&steps, "Service/vault/vault-agent-injector-svc");
        assert_eq!(service.pointer("/spec/ports/0/targetPort"), Some(&json!(8080)));
    }
}
