use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, its protocol, and the cluster store.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("workshop document error: {0}")]
    Document(#[from] workshop_core::WorkshopError),

    #[error("reconcile error: {0}")]
    Converge(#[from] workshop_converge::ConvergeError),

    #[error("store error: {0}")]
    Store(#[from] workshop_converge::StoreError),

    #[error("manifest error: {0}")]
    Render(#[from] workshop_manifests::RenderError),

    #[error("failed to parse daemon config at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
