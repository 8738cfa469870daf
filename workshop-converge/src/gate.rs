//! Readiness gate: the single asynchronous wait point of a tick.
//!
//! A point read first, so a workload that converged on an earlier tick costs
//! nothing; then a watch on that one object, bounded by the gate's own
//! timeout and preempted by the tick deadline.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use workshop_core::{ManagedResource, ObjectRef};

use crate::store::{get_opt, ObjectStore, WatchEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    Satisfied,
    /// Preempted by the tick deadline, or the watch ended early.
    NotYetSatisfied,
    TimedOut,
    Failed(String),
}

impl GateResult {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, GateResult::Satisfied)
    }
}

/// Observed ready count; a missing `status.readyReplicas` counts as zero.
pub fn ready_replicas(resource: &ManagedResource) -> i64 {
    resource
        .pointer("/status/readyReplicas")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct ReadinessGate {
    pub timeout: Duration,
    /// Outer deadline of the surrounding tick.
    pub deadline: Option<Instant>,
    pub log_tail_bytes: usize,
}

impl ReadinessGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
            log_tail_bytes: crate::config::DEFAULT_LOG_TAIL_BYTES,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_log_tail_bytes(mut self, bytes: usize) -> Self {
        self.log_tail_bytes = bytes;
        self
    }

    pub async fn await_ready(
        &self,
        store: &dyn ObjectStore,
        target: &ObjectRef,
        target_ready: i64,
    ) -> GateResult {
        match get_opt(store, target).await {
            Ok(Some(obj)) if ready_replicas(&obj) >= target_ready => return GateResult::Satisfied,
            Ok(_) => {}
            Err(err) => {
                let result = GateResult::Failed(err.to_string());
                self.gather_diagnostics(store, target).await;
                return result;
            }
        }

        let own_deadline = Instant::now() + self.timeout;
        let (deadline, preempted) = match self.deadline {
            Some(tick) if tick < own_deadline => (tick, true),
            _ => (own_deadline, false),
        };

        let mut rx = match store.watch(target).await {
            Ok(rx) => rx,
            Err(err) => {
                self.gather_diagnostics(store, target).await;
                return GateResult::Failed(err.to_string());
            }
        };

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(WatchEvent::Error(reason))) => {
                    self.gather_diagnostics(store, target).await;
                    return GateResult::Failed(reason);
                }
                Ok(Some(event)) => {
                    if event.resource().is_some_and(|obj| ready_replicas(obj) >= target_ready) {
                        return GateResult::Satisfied;
                    }
                }
                Ok(None) => return GateResult::NotYetSatisfied,
                Err(_) if preempted => {
                    tracing::info!(target_ref = %target, "readiness wait preempted by tick deadline");
                    return GateResult::NotYetSatisfied;
                }
                Err(_) => {
                    tracing::info!(target_ref = %target, timeout_secs = self.timeout.as_secs(), "readiness wait timed out");
                    self.gather_diagnostics(store, target).await;
                    return GateResult::TimedOut;
                }
            }
        }
    }

    /// Recent events and a log tail, for operators. Never fails the caller.
    async fn gather_diagnostics(&self, store: &dyn ObjectStore, target: &ObjectRef) {
        match store.recent_events(target).await {
            Ok(events) => {
                for event in events {
                    tracing::info!(
                        target_ref = %target,
                        event_type = %event.event_type,
                        reason = %event.reason,
                        "{}",
                        event.message
                    );
                }
            }
            Err(err) => tracing::warn!(target_ref = %target, "could not gather events: {err}"),
        }
        match store.pod_log_tail(target, self.log_tail_bytes).await {
            Ok(Some(tail)) => tracing::info!(target_ref = %target, "pod log tail:\n{tail}"),
            Ok(None) => {}
            Err(err) => tracing::warn!(target_ref = %target, "could not gather pod logs: {err}"),
        }
    }
}
