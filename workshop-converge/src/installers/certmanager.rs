//! cert-manager operator from the certified catalog.

use serde_json::json;

use workshop_core::{Component, Workshop};
use workshop_manifests::params::Meta;

use super::{custom_resource, namespace, part_of, Operator, CERTIFIED_CATALOG, OPERATORS_NAMESPACE};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};
use crate::step::Step;

const CERT_MANAGER_NAMESPACE: &str = "cert-manager";
const SYSTEM: &str = "certmanager";

pub struct CertManagerInstaller;

impl Installer for CertManagerInstaller {
    fn component(&self) -> Component {
        Component::CertManager
    }

    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError> {
        let mut steps = Operator {
            package: "cert-manager-operator",
            namespace: OPERATORS_NAMESPACE,
            catalog: CERTIFIED_CATALOG,
            hub: &workshop.spec.infrastructure.cert_manager.operator_hub,
        }
        .steps(ctx)?;
        steps.push(namespace(ctx, CERT_MANAGER_NAMESPACE, part_of(SYSTEM))?);
        steps.push(Step::Apply(custom_resource(
            ctx,
            Meta::namespaced(CERT_MANAGER_NAMESPACE, "cert-manager").with_labels(part_of(SYSTEM)),
            "operator.cert-manager.io/v1alpha1",
            "CertManager",
            json!({}),
        )?));
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::testing::{find, plan, workshop};

    #[test]
    fn subscribes_from_certified_catalog() {
        let steps = plan(&CertManagerInstaller, &workshop(1, |s| s.infrastructure.cert_manager.enabled = true));
        let sub = find(&steps, "Subscription/openshift-operators/cert-manager-operator");
        assert_eq!(sub.pointer_str("/spec/source"), Some(CERTIFIED_CATALOG));
        assert_eq!(
            find(&steps, "CertManager/cert-manager/cert-manager").metadata.labels["app.kubernetes.io/part-of"],
            SYSTEM
        );
    }
}
