//! Error types for workshop-manifests.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while building manifests.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building the tera context from params).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A template rendered text that is not a valid resource document.
    #[error("template {template} rendered an invalid resource: {source}")]
    Manifest {
        template: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Filesystem error while loading user templates.
    #[error("template io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}
