//! steward-core
//!
//! Pure domain vocabulary for the Steward reconciliation engine: manifests,
//! resource identities, lifecycle states, permission sets, and annotation
//! conventions. No async, no I/O; this is the shared vocabulary every other
//! Steward crate builds on.

pub mod annotations;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod permissions;
pub mod state;

pub use crate::error::CoreError;
pub use crate::identity::ResourceIdentity;
pub use crate::manifest::{Manifest, Meta, Status};
pub use crate::permissions::{Operation, PermissionSet};
pub use crate::state::LifecycleState;
