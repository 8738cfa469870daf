//! Unified diffs between resource states, rendered as YAML.

use serde_json::{Map, Value};
use similar::TextDiff;

use workshop_core::ManagedResource;

use crate::applier::OwnedFields;

/// Unified diff between two texts with `a/<label>` / `b/<label>` headers.
/// `None` when they are identical.
pub fn text_diff(old: &str, new: &str, label: &str) -> Option<String> {
    if old == new {
        return None;
    }
    let old_header = format!("a/{label}");
    let new_header = format!("b/{label}");
    Some(
        TextDiff::from_lines(old, new)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string(),
    )
}

/// YAML rendering of a resource without server-assigned identity, so two
/// renderings of the same desired object compare equal.
pub fn render_yaml(resource: &ManagedResource) -> String {
    let mut clean = resource.clone();
    clean.metadata.uid = None;
    clean.metadata.resource_version = None;
    clean.metadata.owner_references.clear();
    serde_yaml::to_string(&clean).unwrap_or_default()
}

pub fn resource_diff(before: &ManagedResource, after: &ManagedResource) -> Option<String> {
    text_diff(
        &render_yaml(before),
        &render_yaml(after),
        &after.object_ref().to_string(),
    )
}

/// Diff restricted to the fields the orchestrator owns on `existing`.
pub fn owned_diff(
    existing: &ManagedResource,
    desired: &ManagedResource,
    fields: &OwnedFields,
) -> Option<String> {
    let project = |res: &ManagedResource| {
        let mut map = Map::new();
        for pointer in fields.pointers() {
            map.insert(
                pointer.to_string(),
                res.pointer(pointer).cloned().unwrap_or(Value::Null),
            );
        }
        serde_yaml::to_string(&Value::Object(map)).unwrap_or_default()
    };
    text_diff(
        &project(existing),
        &project(desired),
        &desired.object_ref().to_string(),
    )
}
