//! Desired-state documents on disk.
//!
//! # Storage layout
//!
//! ```text
//! ~/.workshop/
//!   workshops/
//!     <name>.yaml     (one Workshop document per tenant, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Functions that touch the home directory come in two forms:
//! - `fn_at(home: &Path, ...)`: explicit home, used by tests with `TempDir`
//! - `fn(...)`: derives home from `dirs::home_dir()` and delegates to `_at`

use std::path::{Path, PathBuf};

use crate::error::{io_err, WorkshopError};
use crate::types::{Workshop, WorkshopSpec, KIND};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.workshop/`
pub fn workshop_root_at(home: &Path) -> PathBuf {
    home.join(".workshop")
}

/// `<home>/.workshop/workshops/`
pub fn documents_dir_at(home: &Path) -> PathBuf {
    workshop_root_at(home).join("workshops")
}

/// `documents_dir_at` convenience wrapper.
pub fn documents_dir() -> Result<PathBuf, WorkshopError> {
    Ok(documents_dir_at(&home()?))
}

/// `<home>/.workshop/workshops/<name>.yaml`: pure, no I/O.
pub fn document_path_at(home: &Path, name: &str) -> PathBuf {
    documents_dir_at(home).join(format!("{name}.yaml"))
}

pub fn is_document_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate one document.
///
/// Returns `DocumentNotFound` when absent, `Parse` (with path and line
/// context) for malformed YAML, and `Invalid` when the document is not a
/// named Workshop.
pub fn load_document_at(path: &Path) -> Result<Workshop, WorkshopError> {
    if !path.exists() {
        return Err(WorkshopError::DocumentNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let doc: Workshop = serde_yaml::from_str(&contents).map_err(|e| WorkshopError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    validate(path, &doc)?;
    Ok(doc)
}

/// Every document under `dir`, sorted by file name. Non-YAML files are
/// skipped; a malformed document fails the whole listing.
pub fn list_documents_at(dir: &Path) -> Result<Vec<(PathBuf, Workshop)>, WorkshopError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_document_path(p))
        .collect();
    entries.sort();

    let mut docs = Vec::with_capacity(entries.len());
    for path in entries {
        let doc = load_document_at(&path)?;
        docs.push((path, doc));
    }
    Ok(docs)
}

fn validate(path: &Path, doc: &Workshop) -> Result<(), WorkshopError> {
    let invalid = |reason: &str| WorkshopError::Invalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if doc.kind != KIND {
        return Err(invalid(&format!("kind must be {KIND}, got '{}'", doc.kind)));
    }
    if doc.metadata.name.trim().is_empty() {
        return Err(invalid("metadata.name is required"));
    }
    let project = &doc.spec.infrastructure.project;
    if project.enabled && project.staging_name.trim().is_empty() {
        return Err(invalid("project.stagingName is required when project is enabled"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `doc` to `path`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_document_at(path: &Path, doc: &Workshop) -> Result<(), WorkshopError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.yaml", doc.metadata.name));
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let yaml = serde_yaml::to_string(doc)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// A starter document: `users` users, per-user projects on, everything else
/// off.
pub fn sample_document(name: &str, users: i64) -> Workshop {
    let mut spec = WorkshopSpec::default();
    spec.user.number = users;
    spec.user.password = "openshift".to_string();
    spec.source.git_url = "https://github.com/mcouliba/cloud-native-workshop".to_string();
    spec.source.git_branch = "ocp-4.7".to_string();
    spec.infrastructure.project.enabled = true;
    spec.infrastructure.project.staging_name = "my-project".to_string();
    spec.infrastructure.gitea.image.name = "quay.io/gpte-devops-automation/gitea-operator".into();
    spec.infrastructure.gitea.image.tag = "v0.17".into();
    spec.infrastructure.guide.bookbag.image.name = "quay.io/mcouliba/bookbag".into();
    spec.infrastructure.guide.bookbag.image.tag = "latest".into();
    spec.infrastructure.vault.image.name = "hashicorp/vault".into();
    spec.infrastructure.vault.image.tag = "1.6.1".into();
    spec.infrastructure.vault.agent_injector_image.name = "hashicorp/vault-k8s".into();
    spec.infrastructure.vault.agent_injector_image.tag = "0.7.0".into();
    Workshop::new(name, spec)
}

/// Write a sample document at `path` unless one exists.
///
/// Idempotent: an existing document is loaded and returned with `false`.
pub fn init_document(path: &Path, name: &str, users: i64) -> Result<(Workshop, bool), WorkshopError> {
    if path.exists() {
        return Ok((load_document_at(path)?, false));
    }
    let doc = sample_document(name, users);
    save_document_at(path, &doc)?;
    Ok((doc, true))
}

/// `init_document` at the default location for `name` under `home`.
pub fn init_document_at(
    home: &Path,
    name: &str,
    users: i64,
) -> Result<(PathBuf, Workshop, bool), WorkshopError> {
    let path = document_path_at(home, name);
    let (doc, created) = init_document(&path, name, users)?;
    Ok((path, doc, created))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, WorkshopError> {
    dirs::home_dir().ok_or(WorkshopError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), WorkshopError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), WorkshopError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
