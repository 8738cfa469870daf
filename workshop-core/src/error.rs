//! Error types for workshop-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from document handling and core conversions.
#[derive(Debug, Error)]
pub enum WorkshopError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file path and serde_yaml line context.
    #[error("failed to parse workshop document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Conversion between the typed document and the generic resource shape.
    #[error("resource conversion error: {0}")]
    Convert(#[from] serde_json::Error),

    #[error("workshop document not found at {path}")]
    DocumentNotFound { path: PathBuf },

    #[error("invalid workshop document at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("expected a {expected} resource, found {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: String,
    },

    /// The console route host did not carry the expected prefix, so the
    /// application hostname suffix cannot be derived.
    #[error("console route host '{host}' does not start with 'console-openshift-console.'")]
    InvalidConsoleHost { host: String },

    #[error("console route has no spec.host")]
    MissingConsoleHost,

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WorkshopError {
    WorkshopError::Io {
        path: path.into(),
        source,
    }
}
