//! Access policy evaluation over the permissions annotation.

use steward_core::annotations;
use steward_core::error::CoreError;
use steward_core::manifest::Manifest;
use steward_core::permissions::{Operation, PermissionSet};

/// The permission set a manifest grants the engine.
///
/// An absent annotation grants everything; a malformed one is a domain
/// error the caller turns into a Failed status.
pub fn permissions_for(manifest: &Manifest) -> Result<PermissionSet, CoreError> {
    match manifest.annotation(annotations::ACCESS_PERMISSIONS) {
        Some(value) => PermissionSet::parse(value),
        None => Ok(PermissionSet::all()),
    }
}

/// Reason string for a denied operation, surfaced in the manifest status.
pub fn denial_reason(op: Operation, granted: PermissionSet) -> String {
    format!("{op} not permitted (granted: {granted})")
}
