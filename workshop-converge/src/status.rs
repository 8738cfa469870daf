//! Status projector: writes per-component convergence back onto the
//! Workshop document.

use workshop_core::{Component, ComponentStatus, ObjectRef, Workshop};

use crate::error::{ConvergeError, StoreError};
use crate::store::ObjectStore;

/// Attempts before a run of update conflicts is reported.
const CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectOutcome {
    Written,
    Unchanged,
}

/// Record `status` for `component` on the latest stored copy of `target`.
///
/// The document is re-read before every attempt, so a concurrent spec edit
/// is never overwritten with a stale copy. Nothing is written when the value
/// is already current.
pub async fn project(
    store: &dyn ObjectStore,
    target: &ObjectRef,
    component: Component,
    status: ComponentStatus,
) -> Result<ProjectOutcome, ConvergeError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let latest = store.get(target).await?;
        let mut workshop = Workshop::from_resource(&latest)?;
        if !workshop.status.set(component, status) {
            return Ok(ProjectOutcome::Unchanged);
        }

        match store.update_status(workshop.to_resource()?).await {
            Ok(_) => {
                tracing::info!(
                    workshop = %target.name,
                    component = %component,
                    status = status.as_str(),
                    "status updated"
                );
                return Ok(ProjectOutcome::Written);
            }
            Err(StoreError::Conflict(_)) if attempt < CONFLICT_RETRIES => {
                tracing::debug!(workshop = %target.name, attempt, "status update conflict, re-reading");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use workshop_core::WorkshopSpec;

    async fn stored(store: &MemoryStore) -> ObjectRef {
        let workshop = Workshop::new("ocp-dev", WorkshopSpec::default());
        let created = store
            .create(workshop.to_resource().expect("resource"))
            .await
            .expect("create");
        created.object_ref()
    }

    #[tokio::test]
    async fn writes_only_on_change() {
        let store = MemoryStore::new();
        let target = stored(&store).await;

        let first = project(&store, &target, Component::Gitea, ComponentStatus::Installed)
            .await
            .expect("project");
        let second = project(&store, &target, Component::Gitea, ComponentStatus::Installed)
            .await
            .expect("project");

        assert_eq!(first, ProjectOutcome::Written);
        assert_eq!(second, ProjectOutcome::Unchanged);
        assert_eq!(store.counts("Workshop").updates, 1);

        let doc = Workshop::from_resource(&store.get(&target).await.expect("get")).expect("decode");
        assert_eq!(doc.status.get(Component::Gitea), ComponentStatus::Installed);
    }

    #[tokio::test]
    async fn keeps_concurrent_spec_edits() {
        let store = MemoryStore::new();
        let target = stored(&store).await;

        let mut edited = Workshop::from_resource(&store.get(&target).await.expect("get")).expect("decode");
        edited.spec.user.number = 7;
        store.update(edited.to_resource().expect("resource")).await.expect("edit");

        project(&store, &target, Component::Project, ComponentStatus::Installed)
            .await
            .expect("project");
        let doc = Workshop::from_resource(&store.get(&target).await.expect("get")).expect("decode");
        assert_eq!(doc.spec.user.number, 7);
        assert_eq!(doc.status.get(Component::Project), ComponentStatus::Installed);
    }

    #[tokio::test]
    async fn missing_document_is_store_error() {
        let store = MemoryStore::new();
        let target = Workshop::new("gone", WorkshopSpec::default()).object_ref();
        let err = project(&store, &target, Component::Vault, ComponentStatus::Installed)
            .await
            .expect_err("absent");
        assert!(matches!(err, ConvergeError::Store(StoreError::NotFound(_))));
    }
}
