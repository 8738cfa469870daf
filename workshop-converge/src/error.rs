//! Error types for workshop-converge.

use thiserror::Error;

use workshop_core::{Component, ObjectRef, WorkshopError};
use workshop_manifests::RenderError;

/// Failures reported by an [`crate::store::ObjectStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectRef),

    /// Returned by `create`; the applier absorbs it.
    #[error("{0} already exists")]
    AlreadyExists(ObjectRef),

    /// Optimistic-concurrency failure on `update`.
    #[error("conflict updating {0}: resource version is stale")]
    Conflict(ObjectRef),

    /// The store refused the request (validation, admission, forbidden).
    #[error("{target} rejected: {reason}")]
    Rejected { target: ObjectRef, reason: String },

    #[error("store transport error: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Everything that can stop a reconcile tick.
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Expected and frequent: the orchestrator turns it into a requeue.
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("readiness gate failed on {target}: {reason}")]
    GateFailed { target: ObjectRef, reason: String },

    #[error("remote call '{call}' failed: {reason}")]
    Remote { call: String, reason: String },

    /// Malformed configuration; never fixed by retrying alone.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("manifest error: {0}")]
    Render(#[from] RenderError),

    #[error("{target} has no {field}")]
    MissingField { target: ObjectRef, field: String },

    #[error("document error: {0}")]
    Document(#[from] WorkshopError),

    /// An installer failed; carries which component stopped the tick.
    #[error("{component} installer failed: {source}")]
    Component {
        component: Component,
        #[source]
        source: Box<ConvergeError>,
    },
}

impl ConvergeError {
    pub fn not_ready(reason: impl Into<String>) -> Self {
        ConvergeError::NotReady(reason.into())
    }

    pub fn is_not_ready(&self) -> bool {
        match self {
            ConvergeError::NotReady(_) => true,
            ConvergeError::Component { source, .. } => source.is_not_ready(),
            _ => false,
        }
    }

    /// Safe to retry on the next tick without anyone changing anything.
    pub fn is_transient(&self) -> bool {
        match self {
            ConvergeError::NotReady(_) => true,
            ConvergeError::Store(err) => matches!(
                err,
                StoreError::Conflict(_) | StoreError::NotFound(_) | StoreError::Transport(_)
            ),
            ConvergeError::Component { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The component that failed, when the error came out of an installer.
    pub fn component(&self) -> Option<Component> {
        match self {
            ConvergeError::Component { component, .. } => Some(*component),
            _ => None,
        }
    }
}
