//! Workshop core library: desired-state documents, the ordered component
//! list, observed status, and the generic managed-resource model.
//!
//! - [`types`]: the Workshop document and its spec
//! - [`component`]: [`Component`] and its dependency order
//! - [`status`]: observed per-component status
//! - [`resource`]: [`ManagedResource`], [`ObjectRef`], owner references
//! - [`routing`]: cluster routing context from the console route
//! - [`document`]: load / save / init on disk

pub mod component;
pub mod document;
pub mod error;
pub mod resource;
pub mod routing;
pub mod status;
pub mod types;

pub use component::Component;
pub use error::WorkshopError;
pub use resource::{labels, ManagedResource, ObjectMeta, ObjectRef, OwnerReference};
pub use routing::RoutingContext;
pub use status::{ComponentStatus, WorkshopStatus};
pub use types::{ImageSpec, OperatorHubSpec, Workshop, WorkshopName, WorkshopSpec};
