//! The remote object store collaborator.
//!
//! Implementations: [`crate::memory::MemoryStore`] (tests, simulation) and the
//! daemon's Kubernetes-backed store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use workshop_core::{ManagedResource, ObjectRef};

use crate::error::StoreError;

/// Buffer for per-watch event channels.
pub const WATCH_BUFFER: usize = 64;

/// One change notification for a watched object.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(ManagedResource),
    Modified(ManagedResource),
    Deleted(ObjectRef),
    /// Terminal: no further events follow.
    Error(String),
}

impl WatchEvent {
    pub fn resource(&self) -> Option<&ManagedResource> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => Some(obj),
            _ => None,
        }
    }
}

/// A cluster event associated with an object, gathered for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reason: String,
    pub message: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, target: &ObjectRef) -> Result<ManagedResource, StoreError>;

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<ManagedResource>, StoreError>;

    /// Returns the stored object with `uid` and `resourceVersion` assigned.
    async fn create(&self, object: ManagedResource) -> Result<ManagedResource, StoreError>;

    /// Fails with `Conflict` when `resourceVersion` is stale.
    async fn update(&self, object: ManagedResource) -> Result<ManagedResource, StoreError>;

    async fn update_status(&self, object: ManagedResource) -> Result<ManagedResource, StoreError> {
        self.update(object).await
    }

    async fn delete(&self, target: &ObjectRef) -> Result<(), StoreError>;

    /// Change stream for one object. The first event is the current object
    /// when it exists.
    async fn watch(&self, target: &ObjectRef) -> Result<mpsc::Receiver<WatchEvent>, StoreError>;

    async fn recent_events(&self, _target: &ObjectRef) -> Result<Vec<ClusterEvent>, StoreError> {
        Ok(vec![])
    }

    /// Up to `max_bytes` from the end of one pod's log for the workload.
    async fn pod_log_tail(
        &self,
        _target: &ObjectRef,
        _max_bytes: usize,
    ) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

/// `get` with `NotFound` mapped to `None`.
pub async fn get_opt(
    store: &dyn ObjectStore,
    target: &ObjectRef,
) -> Result<Option<ManagedResource>, StoreError> {
    match store.get(target).await {
        Ok(obj) => Ok(Some(obj)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// `delete` where an already-absent object counts as success. Returns
/// whether anything was deleted.
pub async fn delete_if_present(
    store: &dyn ObjectStore,
    target: &ObjectRef,
) -> Result<bool, StoreError> {
    match store.delete(target).await {
        Ok(()) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// The last `max_bytes` of `log`, cut forward to a char boundary.
pub fn log_tail(log: &str, max_bytes: usize) -> &str {
    if log.len() <= max_bytes {
        return log;
    }
    let mut start = log.len() - max_bytes;
    while !log.is_char_boundary(start) {
        start += 1;
    }
    &log[start..]
}
