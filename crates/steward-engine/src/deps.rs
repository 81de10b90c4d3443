//! Dependency resolution over read-only store lookups.
//!
//! A dependency is consulted only through its manifest's status, never
//! through its external system; each external resource keeps a single
//! writer.

use steward_core::identity::ResourceIdentity;
use steward_core::manifest::Manifest;
use steward_core::state::LifecycleState;
use steward_store::error::StoreError;
use steward_store::store::ManifestStore;

/// Readiness of a manifest's declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    Ready,
    /// The first reference that is not Succeeded. A missing manifest reports
    /// `state: None` and is treated identically to an unsatisfied one.
    Blocked {
        reference: ResourceIdentity,
        state: Option<LifecycleState>,
    },
}

/// Walk the declared dependencies in order and report the first blocker.
pub async fn resolve(
    store: &dyn ManifestStore,
    manifest: &Manifest,
) -> Result<DependencyStatus, StoreError> {
    for reference in &manifest.dependencies {
        match store.get(reference).await? {
            Some(dep) if dep.status.state == LifecycleState::Succeeded => {}
            Some(dep) => {
                return Ok(DependencyStatus::Blocked {
                    reference: reference.clone(),
                    state: Some(dep.status.state),
                });
            }
            None => {
                return Ok(DependencyStatus::Blocked {
                    reference: reference.clone(),
                    state: None,
                });
            }
        }
    }
    Ok(DependencyStatus::Ready)
}

impl DependencyStatus {
    /// Reason string for a blocked resource, surfaced in the manifest
    /// status while it waits.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Ready => None,
            Self::Blocked { reference, state } => Some(match state {
                Some(state) => format!("waiting for dependency {reference} ({state})"),
                None => format!("waiting for dependency {reference} (not found)"),
            }),
        }
    }
}
