//! Tunables for one reconcile tick.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_GATE_TIMEOUT_SECS: u64 = 420;
pub const DEFAULT_NOT_READY_REQUEUE_SECS: u64 = 5;
pub const DEFAULT_LOG_TAIL_BYTES: usize = 60_000;

fn default_gate_timeout_secs() -> u64 {
    DEFAULT_GATE_TIMEOUT_SECS
}

fn default_not_ready_requeue_secs() -> u64 {
    DEFAULT_NOT_READY_REQUEUE_SECS
}

fn default_log_tail_bytes() -> usize {
    DEFAULT_LOG_TAIL_BYTES
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergeConfig {
    /// Upper bound for a single readiness gate.
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
    /// Outer deadline for a whole tick; gates are preempted by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_budget_secs: Option<u64>,
    #[serde(default = "default_not_ready_requeue_secs")]
    pub not_ready_requeue_secs: u64,
    /// Bytes of pod log gathered when a gate times out or fails.
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: usize,
    /// `false` logs and skips every remote call step.
    #[serde(default = "default_true")]
    pub remote_calls: bool,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            gate_timeout_secs: DEFAULT_GATE_TIMEOUT_SECS,
            tick_budget_secs: None,
            not_ready_requeue_secs: DEFAULT_NOT_READY_REQUEUE_SECS,
            log_tail_bytes: DEFAULT_LOG_TAIL_BYTES,
            remote_calls: true,
        }
    }
}

impl ConvergeConfig {
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }

    pub fn tick_budget(&self) -> Option<Duration> {
        self.tick_budget_secs.map(Duration::from_secs)
    }

    pub fn not_ready_requeue(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_uses_defaults() {
        let config: ConvergeConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config, ConvergeConfig::default());
        assert_eq!(config.gate_timeout(), Duration::from_secs(420));
        assert!(config.remote_calls);
        assert!(config.tick_budget().is_none());
    }

    #[test]
    fn camel_case_overrides() {
        let config: ConvergeConfig =
            serde_yaml::from_str("gateTimeoutSecs: 30\ntickBudgetSecs: 90\nremoteCalls: false\n")
                .expect("parse");
        assert_eq!(config.gate_timeout_secs, 30);
        assert_eq!(config.tick_budget(), Some(Duration::from_secs(90)));
        assert!(!config.remote_calls);
        assert_eq!(config.log_tail_bytes, 60_000);
    }
}
