//! Tera rendering engine: [`ManifestKind`] and [`Manifests`].
//!
//! # Template mapping
//!
//! | Kind                       | Template                                |
//! |----------------------------|-----------------------------------------|
//! | Namespace                  | `namespace.yaml.tera`                   |
//! | ServiceAccount             | `service_account.yaml.tera`             |
//! | ConfigMap / Secret         | `config_map.yaml.tera`, `secret.yaml.tera` |
//! | (Cluster)Role(Binding)     | `role.yaml.tera`, `role_binding.yaml.tera` |
//! | Service / Route / PVC      | `service.yaml.tera`, `route.yaml.tera`, `persistent_volume_claim.yaml.tera` |
//! | Deployment / StatefulSet   | `deployment.yaml.tera`, `stateful_set.yaml.tera` |
//! | Subscription / OperatorGroup | `subscription.yaml.tera`, `operator_group.yaml.tera` |
//! | CRD / custom resource      | `custom_resource_definition.yaml.tera`, `custom_resource.yaml.tera` |
//! | MutatingWebhookConfiguration | `mutating_webhook.yaml.tera`          |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::{Context, Tera};

use workshop_core::ManagedResource;

use crate::error::RenderError;
use crate::params::Manifest;

/// Plain-text Vault server configuration (HCL), rendered into a ConfigMap.
pub const VAULT_CONFIG: &str = "vault/config.hcl.tera";

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/_metadata.tera", include_str!("templates/_partials/metadata.tera")),
    ("namespace.yaml.tera", include_str!("templates/namespace.yaml.tera")),
    (
        "service_account.yaml.tera",
        include_str!("templates/service_account.yaml.tera"),
    ),
    ("config_map.yaml.tera", include_str!("templates/config_map.yaml.tera")),
    ("secret.yaml.tera", include_str!("templates/secret.yaml.tera")),
    ("role.yaml.tera", include_str!("templates/role.yaml.tera")),
    ("role_binding.yaml.tera", include_str!("templates/role_binding.yaml.tera")),
    ("service.yaml.tera", include_str!("templates/service.yaml.tera")),
    ("route.yaml.tera", include_str!("templates/route.yaml.tera")),
    (
        "persistent_volume_claim.yaml.tera",
        include_str!("templates/persistent_volume_claim.yaml.tera"),
    ),
    ("deployment.yaml.tera", include_str!("templates/deployment.yaml.tera")),
    ("stateful_set.yaml.tera", include_str!("templates/stateful_set.yaml.tera")),
    ("subscription.yaml.tera", include_str!("templates/subscription.yaml.tera")),
    (
        "operator_group.yaml.tera",
        include_str!("templates/operator_group.yaml.tera"),
    ),
    (
        "custom_resource_definition.yaml.tera",
        include_str!("templates/custom_resource_definition.yaml.tera"),
    ),
    (
        "custom_resource.yaml.tera",
        include_str!("templates/custom_resource.yaml.tera"),
    ),
    (
        "mutating_webhook.yaml.tera",
        include_str!("templates/mutating_webhook.yaml.tera"),
    ),
    (VAULT_CONFIG, include_str!("templates/vault/config.hcl.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// `.tera` files under `dir`, keyed by their relative path.
fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((normalize_template_name(rel), contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, body)| (normalize_template_name(Path::new(name)), (*body).to_string()))
        .collect();
    if let Some(dir) = user_template_dir {
        templates.extend(load_user_templates(dir)?);
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// ManifestKind
// ---------------------------------------------------------------------------

/// Every resource shape the components render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    Namespace,
    ServiceAccount,
    ConfigMap,
    Secret,
    Role,
    RoleBinding,
    Service,
    Route,
    PersistentVolumeClaim,
    Deployment,
    StatefulSet,
    Subscription,
    OperatorGroup,
    CustomResourceDefinition,
    CustomResource,
    MutatingWebhook,
}

impl ManifestKind {
    pub fn all() -> &'static [ManifestKind] {
        &[
            ManifestKind::Namespace,
            ManifestKind::ServiceAccount,
            ManifestKind::ConfigMap,
            ManifestKind::Secret,
            ManifestKind::Role,
            ManifestKind::RoleBinding,
            ManifestKind::Service,
            ManifestKind::Route,
            ManifestKind::PersistentVolumeClaim,
            ManifestKind::Deployment,
            ManifestKind::StatefulSet,
            ManifestKind::Subscription,
            ManifestKind::OperatorGroup,
            ManifestKind::CustomResourceDefinition,
            ManifestKind::CustomResource,
            ManifestKind::MutatingWebhook,
        ]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            ManifestKind::Namespace                => "namespace.yaml.tera",
            ManifestKind::ServiceAccount           => "service_account.yaml.tera",
            ManifestKind::ConfigMap                => "config_map.yaml.tera",
            ManifestKind::Secret                   => "secret.yaml.tera",
            ManifestKind::Role                     => "role.yaml.tera",
            ManifestKind::RoleBinding              => "role_binding.yaml.tera",
            ManifestKind::Service                  => "service.yaml.tera",
            ManifestKind::Route                    => "route.yaml.tera",
            ManifestKind::PersistentVolumeClaim    => "persistent_volume_claim.yaml.tera",
            ManifestKind::Deployment               => "deployment.yaml.tera",
            ManifestKind::StatefulSet              => "stateful_set.yaml.tera",
            ManifestKind::Subscription             => "subscription.yaml.tera",
            ManifestKind::OperatorGroup            => "operator_group.yaml.tera",
            ManifestKind::CustomResourceDefinition => "custom_resource_definition.yaml.tera",
            ManifestKind::CustomResource           => "custom_resource.yaml.tera",
            ManifestKind::MutatingWebhook          => "mutating_webhook.yaml.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// Tera-backed manifest builder with optional user template overrides.
///
/// `user_template_dir` may hold `.tera` files that replace embedded defaults
/// of the same relative name (`deployment.yaml.tera`, `vault/config.hcl.tera`).
/// Create once and share; rendering takes `&self`.
pub struct Manifests {
    tera: Tera,
}

impl Manifests {
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Manifests {
            tera: build_tera(user_template_dir)?,
        })
    }

    /// Embedded templates only.
    pub fn embedded() -> Result<Self, RenderError> {
        Self::new(None)
    }

    /// Render `params` through its template and parse the result.
    pub fn build<M: Manifest>(&self, params: &M) -> Result<ManagedResource, RenderError> {
        let template = params.kind().template_name();
        let text = self.render_text(template, params)?;
        serde_yaml::from_str(&text).map_err(|source| RenderError::Manifest {
            template: template.to_string(),
            source,
        })
    }

    /// Render any registered template to a string.
    pub fn render_text<C: Serialize>(&self, template: &str, ctx: &C) -> Result<String, RenderError> {
        let ctx = Context::from_serialize(ctx)?;
        Ok(self.tera.render(template, &ctx)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{Meta, NamespaceParams};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn embedded_templates_load() {
        Manifests::embedded().expect("embedded templates should parse");
    }

    #[test]
    fn every_kind_has_a_registered_template() {
        let names: Vec<_> = TPLS.iter().map(|(n, _)| *n).collect();
        for kind in ManifestKind::all() {
            assert!(
                names.contains(&kind.template_name()),
                "no template registered for {kind:?}"
            );
        }
    }

    #[test]
    fn user_template_overrides_embedded() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join("namespace.yaml.tera"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {{ name }}-custom\n",
        )
        .expect("write");

        let manifests = Manifests::new(Some(dir.path())).expect("engine");
        let ns = manifests
            .build(&NamespaceParams {
                meta: Meta::cluster("labs"),
            })
            .expect("build");
        assert_eq!(ns.name(), "labs-custom");
    }

    #[test]
    fn missing_user_dir_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        Manifests::new(Some(&dir.path().join("absent"))).expect("engine");
    }

    #[test]
    fn broken_override_reports_template() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("namespace.yaml.tera"), "kind: [unclosed\n").expect("write");
        let manifests = Manifests::new(Some(dir.path())).expect("engine");
        let err = manifests
            .build(&NamespaceParams {
                meta: Meta::cluster("labs"),
            })
            .unwrap_err();
        assert!(err.to_string().contains("namespace.yaml.tera"), "got: {err}");
    }

    #[test]
    fn vault_config_renders_ports() {
        let manifests = Manifests::embedded().expect("engine");
        let hcl = manifests
            .render_text(
                VAULT_CONFIG,
                &json!({"api_port": 8200, "cluster_port": 8201, "data_dir": "/vault/data"}),
            )
            .expect("render");
        assert!(hcl.contains("address = \"[::]:8200\""));
        assert!(hcl.contains("path = \"/vault/data\""));
        assert!(!hcl.contains('\r'));
    }
}
