//! Rendered manifests must parse into the resource shapes the cluster expects.

use std::collections::BTreeMap;

use rstest::rstest;
use serde_json::json;
use workshop_core::labels;
use workshop_manifests::params::*;
use workshop_manifests::Manifests;

fn manifests() -> Manifests {
    Manifests::embedded().expect("embedded templates")
}

#[test]
fn namespace_omits_empty_metadata_maps() {
    let ns = manifests()
        .build(&NamespaceParams {
            meta: Meta::cluster("user1-project"),
        })
        .expect("build");
    assert_eq!(ns.api_version, "v1");
    assert_eq!(ns.kind, "Namespace");
    assert!(ns.metadata.labels.is_empty());
    assert!(ns.metadata.namespace.is_none());
}

#[test]
fn deployment_uses_selector_for_pods() {
    let selector = labels(&[("app", "portal")]);
    let container = Container::new("portal", "quay.io/mcouliba/portal:latest")
        .env("CONSOLE_URL", "https://console")
        .port(ContainerPort::tcp(8080));
    let mut params = DeploymentParams::single(
        Meta::namespaced("workshop-infra", "portal").with_labels(labels(&[("app", "portal")])),
        selector,
        container,
    );
    params.service_account = Some("portal".into());

    let dep = manifests().build(&params).expect("build");
    assert_eq!(dep.kind, "Deployment");
    assert_eq!(dep.metadata.namespace.as_deref(), Some("workshop-infra"));
    assert_eq!(dep.pointer("/spec/replicas"), Some(&json!(1)));
    assert_eq!(
        dep.pointer("/spec/selector/matchLabels"),
        dep.pointer("/spec/template/metadata/labels")
    );
    assert_eq!(
        dep.pointer_str("/spec/template/spec/containers/0/env/0/value"),
        Some("https://console")
    );
    assert_eq!(
        dep.pointer("/spec/template/spec/containers/0/ports/0/containerPort"),
        Some(&json!(8080))
    );
    assert_eq!(dep.pointer_str("/spec/template/spec/serviceAccountName"), Some("portal"));
    assert!(dep.pointer("/spec/template/metadata/annotations").is_none());
}

#[test]
fn subscription_requires_manual_approval() {
    let sub = manifests()
        .build(&SubscriptionParams {
            meta: Meta::namespaced("openshift-operators", "openshift-pipelines-operator"),
            package: "openshift-pipelines-operator-rh".into(),
            channel: "ocp-4.7".into(),
            catalog: "redhat-operators".into(),
            starting_csv: Some("openshift-pipelines-operator.v1.3.1".into()),
        })
        .expect("build");
    assert_eq!(sub.pointer_str("/spec/installPlanApproval"), Some("Manual"));
    assert_eq!(sub.pointer_str("/spec/sourceNamespace"), Some("openshift-marketplace"));
    assert_eq!(
        sub.pointer_str("/spec/startingCSV"),
        Some("openshift-pipelines-operator.v1.3.1")
    );
}

#[test]
fn subscription_without_starting_csv_leaves_it_out() {
    let sub = manifests()
        .build(&SubscriptionParams {
            meta: Meta::namespaced("openshift-operators", "gitea"),
            package: "gitea-operator".into(),
            channel: "stable".into(),
            catalog: "community-operators".into(),
            starting_csv: None,
        })
        .expect("build");
    assert!(sub.pointer("/spec/startingCSV").is_none());
}

#[rstest]
#[case(false, "Role", "RoleBinding")]
#[case(true, "ClusterRole", "ClusterRoleBinding")]
fn rbac_scope_selects_kind(#[case] cluster: bool, #[case] role_kind: &str, #[case] binding_kind: &str) {
    let meta = if cluster {
        Meta::cluster("vault-auth")
    } else {
        Meta::namespaced("vault", "vault-auth")
    };
    let role = manifests()
        .build(&RoleParams {
            meta: meta.clone(),
            cluster_scoped: cluster,
            rules: vec![PolicyRule::new(&[""], &["secrets"], &["get", "list"])],
        })
        .expect("role");
    assert_eq!(role.kind, role_kind);
    assert_eq!(role.pointer_str("/rules/0/resources/0"), Some("secrets"));

    let binding = manifests()
        .build(&RoleBindingParams {
            meta,
            cluster_scoped: cluster,
            role_kind: role_kind.into(),
            role_name: "vault-auth".into(),
            subjects: vec![Subject::service_account("vault", "vault")],
        })
        .expect("binding");
    assert_eq!(binding.kind, binding_kind);
    assert_eq!(binding.pointer_str("/roleRef/kind"), Some(role_kind));
    assert_eq!(binding.pointer_str("/subjects/0/namespace"), Some("vault"));
}

#[test]
fn route_host_and_tls_are_optional() {
    let plain = manifests()
        .build(&RouteParams {
            meta: Meta::namespaced("workshop-infra", "nexus"),
            host: None,
            service: "nexus".into(),
            target_port: json!(8081),
            tls: false,
        })
        .expect("build");
    assert!(plain.pointer("/spec/host").is_none());
    assert!(plain.pointer("/spec/tls").is_none());

    let secure = manifests()
        .build(&RouteParams {
            meta: Meta::namespaced("workshop-infra", "portal"),
            host: Some("portal.apps.example.com".into()),
            service: "portal".into(),
            target_port: json!("http"),
            tls: true,
        })
        .expect("build");
    assert_eq!(secure.pointer_str("/spec/host"), Some("portal.apps.example.com"));
    assert_eq!(secure.pointer_str("/spec/tls/termination"), Some("edge"));
    assert_eq!(secure.pointer_str("/spec/port/targetPort"), Some("http"));
}

#[test]
fn crd_names_and_first_version_stores() {
    let mut params = CustomResourceDefinitionParams::new("redhatgov.io", "Gitea", "giteas", "v1alpha1");
    params.versions.push("v1".into());
    let crd = manifests().build(&params).expect("build");
    assert_eq!(crd.name(), "giteas.redhatgov.io");
    assert_eq!(crd.pointer_str("/spec/names/listKind"), Some("GiteaList"));
    assert_eq!(crd.pointer_str("/spec/scope"), Some("Namespaced"));
    assert_eq!(crd.pointer("/spec/versions/0/storage"), Some(&json!(true)));
    assert_eq!(crd.pointer("/spec/versions/1/storage"), Some(&json!(false)));
}

#[test]
fn custom_resource_carries_spec_verbatim() {
    let cr = manifests()
        .build(&CustomResourceParams {
            meta: Meta::namespaced("gitea", "gitea-server"),
            api_version: "gpte.opentlc.com/v1".into(),
            kind: "Gitea".into(),
            spec: json!({"giteaSsl": true, "postgresqlVolumeSize": "4Gi"}),
        })
        .expect("build");
    assert_eq!(cr.api_version, "gpte.opentlc.com/v1");
    assert_eq!(cr.pointer("/spec/giteaSsl"), Some(&json!(true)));
}

#[test]
fn secret_and_config_map_quote_awkward_values() {
    let mut data = BTreeMap::new();
    data.insert("config.hcl".to_string(), "ui = true\nlistener \"tcp\" {}\n".to_string());
    data.insert("yes".to_string(), "no: colon".to_string());
    let cm = manifests()
        .build(&ConfigMapParams {
            meta: Meta::namespaced("vault", "vault-config"),
            data: data.clone(),
        })
        .expect("cm");
    assert_eq!(cm.pointer_str("/data/yes"), Some("no: colon"));
    assert_eq!(
        cm.pointer_str("/data/config.hcl"),
        Some("ui = true\nlistener \"tcp\" {}\n")
    );

    let secret = manifests()
        .build(&SecretParams::opaque(Meta::namespaced("gitea", "creds"), data))
        .expect("secret");
    assert_eq!(secret.pointer_str("/type"), Some("Opaque"));
    assert_eq!(secret.pointer_str("/stringData/yes"), Some("no: colon"));
}

#[test]
fn stateful_set_emits_claim_templates() {
    let sts = manifests()
        .build(&StatefulSetParams {
            meta: Meta::namespaced("vault", "vault"),
            service_name: "vault-internal".into(),
            replicas: 1,
            selector: labels(&[("app.kubernetes.io/name", "vault")]),
            service_account: Some("vault".into()),
            containers: vec![Container::new("vault", "hashicorp/vault:1.6.1").mount("data", "/vault/data")],
            volumes: vec![],
            volume_claims: vec![json!({
                "metadata": {"name": "data"},
                "spec": {"accessModes": ["ReadWriteOnce"], "resources": {"requests": {"storage": "10Gi"}}}
            })],
        })
        .expect("build");
    assert_eq!(sts.pointer_str("/spec/serviceName"), Some("vault-internal"));
    assert_eq!(
        sts.pointer_str("/spec/volumeClaimTemplates/0/metadata/name"),
        Some("data")
    );
    assert_eq!(
        sts.pointer_str("/spec/template/spec/containers/0/volumeMounts/0/mountPath"),
        Some("/vault/data")
    );
    assert!(sts.pointer("/spec/template/spec/volumes").is_none());
}

#[test]
fn headless_service_sets_cluster_ip_none() {
    let svc = manifests()
        .build(&ServiceParams {
            meta: Meta::namespaced("vault", "vault-internal"),
            cluster_ip: Some("None".into()),
            selector: labels(&[("app", "vault")]),
            ports: vec![ServicePort::tcp("http", 8200, 8200)],
        })
        .expect("build");
    assert_eq!(svc.pointer_str("/spec/clusterIP"), Some("None"));
    assert_eq!(svc.pointer("/spec/ports/0/targetPort"), Some(&json!(8200)));
}

#[test]
fn mutating_webhook_points_at_service() {
    let hook = manifests()
        .build(&MutatingWebhookParams {
            meta: Meta::cluster("vault-agent-injector-cfg"),
            webhook_name: "vault.hashicorp.com".into(),
            service: "vault-agent-injector-svc".into(),
            service_namespace: "vault".into(),
            path: "/mutate".into(),
        })
        .expect("build");
    assert_eq!(hook.kind, "MutatingWebhookConfiguration");
    assert_eq!(
        hook.pointer_str("/webhooks/0/clientConfig/service/namespace"),
        Some("vault")
    );
}

#[test]
fn operator_group_and_pvc() {
    let og = manifests()
        .build(&OperatorGroupParams {
            meta: Meta::namespaced("workspaces", "codeready-workspaces"),
            target_namespaces: vec!["workspaces".into()],
        })
        .expect("og");
    assert_eq!(og.pointer_str("/spec/targetNamespaces/0"), Some("workspaces"));

    let pvc = manifests()
        .build(&PersistentVolumeClaimParams {
            meta: Meta::namespaced("workshop-infra", "nexus-data"),
            storage: "10Gi".into(),
        })
        .expect("pvc");
    assert_eq!(pvc.pointer_str("/spec/resources/requests/storage"), Some("10Gi"));
}
