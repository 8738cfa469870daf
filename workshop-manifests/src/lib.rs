//! # workshop-manifests
//!
//! Tera templates that produce the Kubernetes resources each workshop
//! component manages. Callers fill a typed parameter struct from
//! [`params`] and get back a [`workshop_core::ManagedResource`].
//!
//! ```rust,no_run
//! use workshop_manifests::{Manifests, params::{Meta, NamespaceParams}};
//!
//! fn namespace(manifests: &Manifests) {
//!     let params = NamespaceParams { meta: Meta::cluster("labs-infra") };
//!     if let Ok(ns) = manifests.build(&params) {
//!         println!("{}", ns.object_ref());
//!     }
//! }
//! ```

pub mod engine;
pub mod error;
pub mod params;

pub use engine::{ManifestKind, Manifests, VAULT_CONFIG};
pub use error::RenderError;
pub use params::Manifest;
