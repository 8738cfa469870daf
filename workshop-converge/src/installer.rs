//! The per-subsystem installer shape and the contexts it runs in.

use async_trait::async_trait;
use tokio::time::Instant;

use workshop_core::{Component, OwnerReference, RoutingContext, Workshop};
use workshop_manifests::Manifests;

use crate::applier::Applier;
use crate::config::ConvergeConfig;
use crate::error::ConvergeError;
use crate::gate::ReadinessGate;
use crate::remote::RemoteTransport;
use crate::step::{execute, Progress, Step};
use crate::store::ObjectStore;

/// Inputs of a pure step-list build.
pub struct PlanContext<'a> {
    pub users: usize,
    pub routing: &'a RoutingContext,
    pub manifests: &'a Manifests,
}

/// Everything a tick hands an installer.
pub struct TickContext<'a> {
    pub workshop: &'a Workshop,
    pub store: &'a dyn ObjectStore,
    pub owner: &'a OwnerReference,
    pub routing: &'a RoutingContext,
    pub config: &'a ConvergeConfig,
    pub transport: &'a dyn RemoteTransport,
    pub manifests: &'a Manifests,
    pub deadline: Option<Instant>,
}

impl<'a> TickContext<'a> {
    pub fn plan_context(&self) -> PlanContext<'a> {
        PlanContext {
            users: self.workshop.spec.user_count(),
            routing: self.routing,
            manifests: self.manifests,
        }
    }

    pub fn applier(&self) -> Applier<'a> {
        Applier::new(self.store, self.owner)
    }

    pub fn gate(&self) -> ReadinessGate {
        ReadinessGate::new(self.config.gate_timeout())
            .with_deadline(self.deadline)
            .with_log_tail_bytes(self.config.log_tail_bytes)
    }
}

#[async_trait]
pub trait Installer: Send + Sync {
    fn component(&self) -> Component;

    /// Ordered steps converging this component for `workshop`. No I/O.
    fn plan(&self, workshop: &Workshop, ctx: &PlanContext<'_>) -> Result<Vec<Step>, ConvergeError>;

    async fn install(&self, ctx: &TickContext<'_>) -> Result<Progress, ConvergeError> {
        let steps = self.plan(ctx.workshop, &ctx.plan_context())?;
        execute(&steps, ctx).await
    }
}
