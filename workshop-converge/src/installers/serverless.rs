//! OpenShift Serverless operator and the Knative Serving instance.

use serde_json::json;

use workshop_core::{Component, Workshop};
use workshop_manifests::params::Meta;

use super::{custom_resource, namespace, part_of, Operator, OPERATORS_NAMESPACE, REDHAT_CATALOG};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

const KNATIVE_NAMESPACE: &str = "knative-serving";
const SYSTEM: &str = "knative";

pub struct ServerlessInstaller;

impl Installer for ServerlessInstaller {
    fn component(&self) -> Component {
        Component::Serverless
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut steps = Operator {
            package: "serverless-operator",
            namespace: OPERATORS_NAMESPACE,
            catalog: REDHAT_CATALOG,
            hub: &workshop.spec.infrastructure.serverless.operator_hub,
        }
        .steps(ctx)?;
        steps.push(namespace(ctx, KNATIVE_NAMESPACE, part_of(SYSTEM))?);
        steps.push(Step::Apply(custom_resource(
            ctx,
            Meta::namespaced(KNATIVE_NAMESPACE, "knative-serving").with_labels(part_of(SYSTEM)),
            "operator.knative.dev/v1alpha1",
            "KnativeServing",
            json!({}),
        )?));
        Ok(steps)
    }
}
