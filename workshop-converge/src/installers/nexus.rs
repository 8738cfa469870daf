//! Shared Nexus artifact repository, installed through its ansible operator.

use serde_json::{json, Value};

use workshop_core::{Component, Workshop};
use workshop_manifests::params::{CustomResourceDefinitionParams, Meta};

use super::{custom_resource, namespace, part_of, AnsibleOperator};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

pub const NEXUS_NAMESPACE: &str = "opentlc-shared";
const SYSTEM: &str = "nexus";
const GROUP: &str = "gpte.opentlc.com";
const OPERATOR_IMAGE: &str = "quay.io/mcouliba/nexus-operator:v0.10";

pub struct NexusInstaller;

impl Installer for NexusInstaller {
    fn component(&self) -> Component {
        Component::Nexus
    }

    fn plan(&self, _workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut crd = CustomResourceDefinitionParams::new(GROUP, "Nexus", "nexus", "v1alpha1");
        crd.singular = "nexus".to_string();
        crd.meta.labels = part_of(SYSTEM);

        let mut steps = vec![
            namespace(ctx, NEXUS_NAMESPACE, part_of(SYSTEM))?,
            Step::Apply(ctx.manifests.build(&crd)?),
        ];
        steps.extend(
            AnsibleOperator {
                name: "nexus-operator",
                namespace: NEXUS_NAMESPACE,
                image: OPERATOR_IMAGE.to_string(),
                system: SYSTEM,
                group: GROUP,
            }
            .steps(ctx)?,
        );
        steps.push(Step::Apply(custom_resource(
            ctx,
            Meta::namespaced(NEXUS_NAMESPACE, "nexus").with_labels(part_of(SYSTEM)),
            &format!("{GROUP}/v1alpha1"),
            "Nexus",
            nexus_spec(),
        )?));
        Ok(steps)
    }
}

fn maven_proxy(name: &str, remote_url: &str) -> Value {
    json!({
        "name": name,
        "remote_url": remote_url,
        "blob_store": "default",
        "strict_content_validation": true,
        "version_policy": "release",
        "layout_policy": "strict"
    })
}

fn nexus_spec() -> Value {
    let mut jboss = maven_proxy("jboss", "https://repository.jboss.org/nexus/content/groups/public");
    jboss["layout_policy"] = json!("permissive");

    json!({
        "nexus_volume_size": "5Gi",
        "nexus_ssl": true,
        "nexus_image_tag": "3.18.1-01-ubi-3",
        "nexus_cpu_request": 1,
        "nexus_cpu_limit": 2,
        "nexus_memory_request": "2Gi",
        "nexus_memory_limit": "2Gi",
        "nexus_repos_maven_proxy": [
            maven_proxy("maven-central", "https://repo1.maven.org/maven2/"),
            maven_proxy("redhat-ga", "https://maven.repository.redhat.com/ga/"),
            jboss
        ],
        "nexus_repos_maven_hosted": [{
            "name": "releases",
            "version_policy": "release",
            "write_policy": "allow_once",
            "blob_store": "default",
            "strict_content_validation": true
        }],
        "nexus_repos_maven_group": [{
            "name": "maven-all-public",
            "blob_store": "default",
            "member_repos": ["maven-central", "redhat-ga", "jboss"]
        }],
        "nexus_repos_docker_hosted": [{
            "name": "docker",
            "http_port": 5000,
            "v1_enabled": true,
            "blob_store": "default"
        }],
        "nexus_repos_npm_proxy": [{
            "name": "npm",
            "remote_url": "https://registry.npmjs.org",
            "blob_store": "default",
            "strict_content_validation": true
        }],
        "nexus_repos_npm_group": [{
            "name": "npm-all",
            "blob_store": "default",
            "member_repos": ["npm"]
        }]
    })
}
