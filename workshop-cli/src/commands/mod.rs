pub mod converge;
pub mod daemon;
pub mod diff;
pub mod init;
pub mod plan;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use workshop_converge::Simulation;
use workshop_core::document::load_document_at;
use workshop_core::{RoutingContext, Workshop};
use workshop_manifests::Manifests;

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_document(path: &Path) -> Result<Workshop> {
    load_document_at(path).with_context(|| format!("failed to load workshop document '{}'", path.display()))
}

pub(crate) fn load_manifests(template_dir: Option<&Path>) -> Result<Manifests> {
    Manifests::new(template_dir).context("failed to load manifest templates")
}

/// Routing for offline commands: an explicit console host, or the simulated
/// cluster's.
pub(crate) fn routing_for(console_host: Option<&str>) -> Result<RoutingContext> {
    let host = console_host
        .map(str::to_string)
        .unwrap_or_else(|| Simulation::openshift().console_host);
    RoutingContext::from_console_host(&host).with_context(|| format!("invalid console host '{host}'"))
}
