//! Install-plan gate for catalog subscriptions with manual approval.

use serde_json::Value;

use workshop_core::{ManagedResource, ObjectRef};

use crate::error::ConvergeError;
use crate::store::{get_opt, ObjectStore};

pub const INSTALL_PLAN_API_VERSION: &str = "operators.coreos.com/v1alpha1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPlanOutcome {
    /// Installed and current versions already match what is wanted.
    Converged,
    /// This call flipped `spec.approved`.
    Approved,
    /// The plan was approved earlier; nothing written.
    AlreadyApproved,
}

/// Whether the subscription still needs its plan approved.
///
/// An empty `desired` means "track latest": approval is needed only until
/// something is installed. Versions compare by exact string equality.
pub fn needs_approval(desired: &str, installed: &str, current: &str) -> bool {
    if desired.is_empty() {
        installed.is_empty()
    } else {
        installed != desired || current != desired
    }
}

fn status_str<'a>(sub: &'a ManagedResource, field: &str) -> &'a str {
    sub.pointer_str(&format!("/status/{field}")).unwrap_or("")
}

fn plan_ref(sub: &ManagedResource, sub_ref: &ObjectRef) -> Option<ObjectRef> {
    let name = sub.pointer_str("/status/installPlanRef/name")?;
    let namespace = sub
        .pointer_str("/status/installPlanRef/namespace")
        .map(str::to_string)
        .or_else(|| sub_ref.namespace.clone())?;
    Some(ObjectRef::namespaced(
        INSTALL_PLAN_API_VERSION,
        "InstallPlan",
        namespace,
        name,
    ))
}

pub async fn approve_if_needed(
    store: &dyn ObjectStore,
    subscription: &ObjectRef,
    desired_version: &str,
) -> Result<InstallPlanOutcome, ConvergeError> {
    let sub = get_opt(store, subscription)
        .await?
        .ok_or_else(|| ConvergeError::not_ready(format!("{subscription} not visible yet")))?;

    let installed = status_str(&sub, "installedCSV");
    let current = status_str(&sub, "currentCSV");
    if !needs_approval(desired_version, installed, current) {
        return Ok(InstallPlanOutcome::Converged);
    }

    let plan_ref = plan_ref(&sub, subscription).ok_or_else(|| {
        ConvergeError::not_ready(format!("{subscription} has no install plan yet"))
    })?;
    let mut plan = get_opt(store, &plan_ref)
        .await?
        .ok_or_else(|| ConvergeError::not_ready(format!("{plan_ref} not visible yet")))?;

    if plan.pointer("/spec/approved") == Some(&Value::Bool(true)) {
        tracing::debug!(plan = %plan_ref, "install plan already approved");
        return Ok(InstallPlanOutcome::AlreadyApproved);
    }
    plan.set_pointer("/spec/approved", Value::Bool(true));
    store.update(plan).await?;
    tracing::info!(plan = %plan_ref, subscription = %subscription.name, "approved install plan");
    Ok(InstallPlanOutcome::Approved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::simulation::Simulation;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("", "", "", true)]
    #[case("", "op.v1", "op.v1", false)]
    #[case("", "op.v1", "op.v2", false)]
    #[case("op.v2", "op.v1", "op.v2", true)]
    #[case("op.v2", "op.v2", "op.v3", true)]
    #[case("op.v2", "op.v2", "op.v2", false)]
    fn approval_predicate(
        #[case] desired: &str,
        #[case] installed: &str,
        #[case] current: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(needs_approval(desired, installed, current), expected);
    }

    fn subscription(name: &str) -> ManagedResource {
        let mut sub = ManagedResource::new(
            INSTALL_PLAN_API_VERSION,
            "Subscription",
            name,
            Some("openshift-operators"),
        );
        sub.set_pointer("/spec/name", json!(name));
        sub
    }

    #[tokio::test]
    async fn missing_subscription_and_plan_ref_are_not_ready() {
        let store = MemoryStore::new();
        let sub = subscription("serverless-operator");
        let err = approve_if_needed(&store, &sub.object_ref(), "").await.unwrap_err();
        assert!(err.is_not_ready());

        store.seed(sub.clone());
        let err = approve_if_needed(&store, &sub.object_ref(), "").await.unwrap_err();
        assert!(err.is_not_ready(), "plan ref not resolved yet: {err}");
    }

    #[tokio::test]
    async fn approves_exactly_once() {
        let store = MemoryStore::new();
        let mut sub = subscription("serverless-operator");
        sub.set_pointer("/status/currentCSV", json!("serverless-operator.v1.12"));
        sub.set_pointer(
            "/status/installPlanRef",
            json!({"name": "install-abc", "namespace": "openshift-operators"}),
        );
        store.seed(sub.clone());
        let mut plan = ManagedResource::new(
            INSTALL_PLAN_API_VERSION,
            "InstallPlan",
            "install-abc",
            Some("openshift-operators"),
        );
        plan.set_pointer("/spec/approved", json!(false));
        store.seed(plan);

        let first = approve_if_needed(&store, &sub.object_ref(), "serverless-operator.v1.12")
            .await
            .expect("first");
        let second = approve_if_needed(&store, &sub.object_ref(), "serverless-operator.v1.12")
            .await
            .expect("second");
        assert_eq!(first, InstallPlanOutcome::Approved);
        assert_eq!(second, InstallPlanOutcome::AlreadyApproved);
        assert_eq!(store.counts("InstallPlan").updates, 1);
    }

    #[tokio::test]
    async fn simulated_install_converges_after_approval() {
        let store = MemoryStore::simulated(Simulation::openshift());
        let created = store.create(subscription("openshift-gitops-operator")).await.expect("create");
        let target = created.object_ref();

        assert_eq!(
            approve_if_needed(&store, &target, "").await.expect("approve"),
            InstallPlanOutcome::Approved
        );
        assert_eq!(
            approve_if_needed(&store, &target, "").await.expect("converged"),
            InstallPlanOutcome::Converged
        );
    }
}
