//! Gitea git server through its ansible operator, plus one account per user.

use async_trait::async_trait;
use serde_json::json;

use workshop_core::{Component, ObjectRef, Workshop};
use workshop_manifests::params::{CustomResourceDefinitionParams, Meta};

use super::{custom_resource, namespace, part_of, user_name, AnsibleOperator};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext, TickContext};
use crate::remote::{RemoteCall, RemoteRequest};
use crate::step::Step;
use crate::store::get_opt;

pub const GITEA_NAMESPACE: &str = "gitea";
pub const GITEA_SERVER: &str = "gitea-server";
const SYSTEM: &str = "gitea";
const GROUP: &str = "gpte.opentlc.com";

pub struct GiteaInstaller;

impl Installer for GiteaInstaller {
    fn component(&self) -> Component {
        Component::Gitea
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut crd = CustomResourceDefinitionParams::new(GROUP, "Gitea", "giteas", "v1alpha1");
        crd.meta.labels = part_of(SYSTEM);

        let mut steps = vec![
            namespace(ctx, GITEA_NAMESPACE, part_of(SYSTEM))?,
            Step::Apply(ctx.manifests.build(&crd)?),
        ];
        steps.extend(
            AnsibleOperator {
                name: "gitea-operator",
                namespace: GITEA_NAMESPACE,
                image: workshop.spec.infrastructure.gitea.image.reference(),
                system: SYSTEM,
                group: GROUP,
            }
            .steps(ctx)?,
        );
        steps.push(Step::Apply(custom_resource(
            ctx,
            Meta::namespaced(GITEA_NAMESPACE, GITEA_SERVER).with_labels(part_of(SYSTEM)),
            &format!("{GROUP}/v1alpha1"),
            "Gitea",
            json!({
                "giteaVolumeSize": "4Gi",
                "giteaSsl": true,
                "postgresqlVolumeSize": "4Gi"
            }),
        )?));
        steps.push(Step::await_rollout(ObjectRef::deployment(GITEA_NAMESPACE, GITEA_SERVER)));

        for index in 1..=ctx.users {
            steps.push(Step::Remote(Box::new(GiteaSignUp {
                user: user_name(index),
                password: workshop.spec.user.password.clone(),
            })));
        }
        Ok(steps)
    }
}

/// Registers one account through Gitea's public sign-up form.
#[derive(Debug, Clone)]
pub struct GiteaSignUp {
    pub user: String,
    pub password: String,
}

#[async_trait]
impl RemoteCall for GiteaSignUp {
    fn describe(&self) -> String {
        format!("gitea sign-up {}", self.user)
    }

    async fn request(&self, ctx: &TickContext<'_>) -> Result<RemoteRequest, ConvergeError> {
        let route_ref = ObjectRef::namespaced("route.openshift.io/v1", "Route", GITEA_NAMESPACE, GITEA_SERVER);
        let route = get_opt(ctx.store, &route_ref)
            .await?
            .ok_or_else(|| ConvergeError::not_ready(format!("{route_ref} not visible yet")))?;
        let host = route
            .pointer_str("/spec/host")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConvergeError::InvalidConfig(format!("{route_ref} has no host")))?;

        let email = format!("{}@none.com", self.user);
        Ok(RemoteRequest::post_form(
            format!("http://{host}/user/sign_up"),
            &[
                ("user_name", self.user.as_str()),
                ("email", email.as_str()),
                ("password", self.password.as_str()),
                ("retype", self.password.as_str()),
            ],
        ))
    }
}
