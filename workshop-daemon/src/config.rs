//! `~/.workshop/config.yaml`: daemon settings plus the engine tunables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use workshop_converge::ConvergeConfig;

use crate::error::{io_err, DaemonError};
use crate::paths::config_path;

pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MIN_REQUEUE_SECS: u64 = 1;

fn default_resync_interval_secs() -> u64 {
    DEFAULT_RESYNC_INTERVAL_SECS
}

fn default_min_requeue_secs() -> u64 {
    DEFAULT_MIN_REQUEUE_SECS
}

/// Which object store the daemon reconciles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Simulated in-memory cluster.
    #[default]
    Memory,
    /// The cluster of the current kubeconfig context.
    Kube,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// Floor for every requeue delay.
    #[serde(default = "default_min_requeue_secs")]
    pub min_requeue_secs: u64,
    /// Overrides for the embedded manifest templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
    #[serde(default)]
    pub converge: ConvergeConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            min_requeue_secs: DEFAULT_MIN_REQUEUE_SECS,
            template_dir: None,
            converge: ConvergeConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }

    pub fn min_requeue(&self) -> Duration {
        Duration::from_secs(self.min_requeue_secs)
    }
}

/// Load the config file under `home`; defaults when it does not exist.
pub fn load_at(home: &Path) -> Result<DaemonConfig, DaemonError> {
    let path = config_path(home);
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if raw.trim().is_empty() {
        return Ok(DaemonConfig::default());
    }
    serde_yaml::from_str(&raw).map_err(|source| DaemonError::Config { path, source })
}
