//! Workshop daemon: document watcher, per-tenant reconcile scheduler,
//! periodic resync, and the control socket.

pub mod config;
mod error;
pub mod kube_store;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;

pub use config::{DaemonConfig, StoreKind};
pub use error::DaemonError;
pub use kube_store::KubeStore;
pub use protocol::{
    request_reconcile, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, upsert_workshop};
pub use scheduler::TenantState;
