//! Offline inspection: what a tick would do for a document, and how the
//! rendered resources of two documents differ.

use std::collections::BTreeMap;

use serde::Serialize;

use workshop_core::{Component, ManagedResource, RoutingContext, Workshop};
use workshop_manifests::Manifests;

use crate::drift::{render_yaml, text_diff};
use crate::error::ConvergeError;
use crate::installer::{Installer, PlanContext};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentPlan {
    pub component: Component,
    pub enabled: bool,
    pub steps: Vec<String>,
}

/// Every installer in order, with its step descriptions when enabled.
pub fn describe_plan(
    workshop: &Workshop,
    installers: &[Box<dyn Installer>],
    routing: &RoutingContext,
    manifests: &Manifests,
) -> Result<Vec<ComponentPlan>, ConvergeError> {
    let ctx = plan_context(workshop, routing, manifests);
    installers
        .iter()
        .map(|installer| {
            let component = installer.component();
            let enabled = component.is_enabled(&workshop.spec);
            let steps = if enabled {
                installer
                    .plan(workshop, &ctx)?
                    .iter()
                    .map(|step| step.describe())
                    .collect()
            } else {
                vec![]
            };
            Ok(ComponentPlan {
                component,
                enabled,
                steps,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDiff {
    /// `Kind/namespace/name`.
    pub target: String,
    pub change: ChangeKind,
    pub unified_diff: String,
}

/// Resource-by-resource diff of what `old` and `new` would apply. Per-user
/// resources dropped by a lower user count show up as removals, matching
/// what the prune steps delete.
pub fn diff_documents(
    old: &Workshop,
    new: &Workshop,
    installers: &[Box<dyn Installer>],
    routing: &RoutingContext,
    manifests: &Manifests,
) -> Result<Vec<ResourceDiff>, ConvergeError> {
    let before = rendered(old, installers, routing, manifests)?;
    let after = rendered(new, installers, routing, manifests)?;

    let mut diffs = vec![];
    for (target, old_yaml) in &before {
        match after.get(target) {
            None => push_diff(&mut diffs, target, ChangeKind::Removed, old_yaml, ""),
            Some(new_yaml) if new_yaml != old_yaml => {
                push_diff(&mut diffs, target, ChangeKind::Changed, old_yaml, new_yaml)
            }
            Some(_) => {}
        }
    }
    for (target, new_yaml) in &after {
        if !before.contains_key(target) {
            push_diff(&mut diffs, target, ChangeKind::Added, "", new_yaml);
        }
    }
    Ok(diffs)
}

fn push_diff(diffs: &mut Vec<ResourceDiff>, target: &str, change: ChangeKind, old: &str, new: &str) {
    if let Some(unified_diff) = text_diff(old, new, target) {
        diffs.push(ResourceDiff {
            target: target.to_string(),
            change,
            unified_diff,
        });
    }
}

fn plan_context<'a>(workshop: &Workshop, routing: &'a RoutingContext, manifests: &'a Manifests) -> PlanContext<'a> {
    PlanContext {
        users: workshop.spec.user_count(),
        routing,
        manifests,
    }
}

fn rendered(
    workshop: &Workshop,
    installers: &[Box<dyn Installer>],
    routing: &RoutingContext,
    manifests: &Manifests,
) -> Result<BTreeMap<String, String>, ConvergeError> {
    let ctx = plan_context(workshop, routing, manifests);
    let mut out = BTreeMap::new();
    for installer in installers {
        if !installer.component().is_enabled(&workshop.spec) {
            continue;
        }
        for step in installer.plan(workshop, &ctx)? {
            if let Some(resource) = step.resource() {
                insert(&mut out, resource);
            }
        }
    }
    Ok(out)
}

fn insert(out: &mut BTreeMap<String, String>, resource: &ManagedResource) {
    out.insert(resource.object_ref().to_string(), render_yaml(resource));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::default_installers;
    use crate::installers::testing::{routing, workshop};

    #[test]
    fn plan_lists_every_component_in_order() {
        let installers = default_installers();
        let doc = workshop(2, |s| s.infrastructure.project.enabled = true);
        let plan = describe_plan(&doc, &installers, &routing(), &Manifests::embedded().expect("manifests")).expect("plan");

        let order: Vec<Component> = plan.iter().map(|p| p.component).collect();
        assert_eq!(order, Component::ORDER.to_vec());
        let project = &plan[1];
        assert!(project.enabled);
        assert!(project.steps.iter().any(|s| s == "apply Namespace/cn-project2"));
        assert!(plan.iter().filter(|p| !p.enabled).all(|p| p.steps.is_empty()));
    }

    #[test]
    fn lower_user_count_shows_removals() {
        let installers = default_installers();
        let manifests = Manifests::embedded().expect("manifests");
        let old = workshop(3, |s| s.infrastructure.project.enabled = true);
        let new = workshop(1, |s| s.infrastructure.project.enabled = true);

        let diffs = diff_documents(&old, &new, &installers, &routing(), &manifests).expect("diff");
        let removed: Vec<&str> = diffs
            .iter()
            .filter(|d| d.change == ChangeKind::Removed)
            .map(|d| d.target.as_str())
            .collect();
        assert!(removed.contains(&"Namespace/cn-project2"));
        assert!(removed.contains(&"Namespace/cn-project3"));
        assert!(!removed.contains(&"Namespace/cn-project1"));
        assert!(diffs.iter().all(|d| d.change != ChangeKind::Added));
    }

    #[test]
    fn identical_documents_have_no_diff() {
        let installers = default_installers();
        let doc = workshop(2, |s| s.infrastructure.gitops.enabled = true);
        let diffs = diff_documents(&doc, &doc.clone(), &installers, &routing(), &Manifests::embedded().expect("manifests")).expect("diff");
        assert!(diffs.is_empty());
    }
}
