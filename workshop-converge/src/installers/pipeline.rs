//! OpenShift Pipelines operator.

use workshop_core::{Component, Workshop};

use super::{Operator, OPERATORS_NAMESPACE, REDHAT_CATALOG};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

pub struct PipelineInstaller;

impl Installer for PipelineInstaller {
    fn component(&self) -> Component {
        Component::Pipeline
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        Operator {
            package: "openshift-pipelines-operator-rh",
            namespace: OPERATORS_NAMESPACE,
            catalog: REDHAT_CATALOG,
            hub: &workshop.spec.infrastructure.pipeline.operator_hub,
        }
        .steps(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{plan, workshop};

    #[test]
    fn subscribes_then_approves() {
        let ws = workshop(1, |spec| {
            spec.infrastructure.pipeline.enabled = true;
            spec.infrastructure.pipeline.operator_hub.channel = "ocp-4.5".into();
        });
        let steps = plan(&PipelineInstaller, &ws);
        assert_eq!(steps.len(), 2);
        let sub = steps[0].resource().expect("subscription");
        assert_eq!(sub.pointer_str("/spec/channel"), Some("ocp-4.5"));
        assert_eq!(sub.pointer_str("/spec/source"), Some(REDHAT_CATALOG));
        assert!(matches!(&steps[1], Step::ApproveInstallPlan { version, .. } if version.is_empty()));
    }
}
