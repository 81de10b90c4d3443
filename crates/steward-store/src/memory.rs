use std::collections::HashMap;

use jiff::Timestamp;
use tokio::sync::{RwLock, broadcast};

use steward_core::identity::ResourceIdentity;
use steward_core::manifest::{Manifest, Meta, Status};

use crate::error::StoreError;
use crate::store::{BoxFuture, CommitOutcome, ManifestStore};

const EVENT_CAPACITY: usize = 256;

/// In-memory reference backend.
///
/// Holds the authoritative copy of every manifest, maintains generation and
/// resource-version counters, and broadcasts the identity of every touched
/// manifest so a runtime can couple store changes to the work dispatcher.
pub struct MemoryStore {
    manifests: RwLock<HashMap<ResourceIdentity, Manifest>>,
    events: broadcast::Sender<ResourceIdentity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            manifests: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Upsert desired state.
    ///
    /// A new manifest gets fresh store-owned metadata and a Pending status
    /// regardless of what the caller filled in. An existing manifest keeps
    /// its status, uid, and finalizers; the spec and dependencies are
    /// replaced, annotations are merged (caller keys win, engine keys
    /// survive), and the generation bumps when the spec changed.
    pub async fn apply(&self, manifest: Manifest) -> Manifest {
        let id = manifest.identity();
        let now = Timestamp::now();
        let stored = {
            let mut manifests = self.manifests.write().await;
            match manifests.get_mut(&id) {
                Some(stored) => {
                    if stored.spec != manifest.spec {
                        stored.spec = manifest.spec;
                        stored.meta.generation += 1;
                        tracing::debug!(
                            identity = %id,
                            generation = stored.meta.generation,
                            "spec changed"
                        );
                    }
                    stored.dependencies = manifest.dependencies;
                    stored.meta.annotations.extend(manifest.meta.annotations);
                    stored.meta.resource_version += 1;
                    stored.meta.updated_at = now;
                    stored.clone()
                }
                None => {
                    let fresh = Manifest {
                        status: Status::default(),
                        meta: Meta {
                            resource_version: 1,
                            annotations: manifest.meta.annotations,
                            finalizers: Vec::new(),
                            deletion_requested: false,
                            created_at: now,
                            updated_at: now,
                            ..Meta::default()
                        },
                        ..manifest
                    };
                    tracing::debug!(identity = %id, "manifest created");
                    manifests.insert(id.clone(), fresh.clone());
                    fresh
                }
            }
        };
        let _ = self.events.send(id);
        stored
    }

    /// Mark a manifest for deletion. The engine observes the flag and runs
    /// external cleanup; the manifest disappears once its finalizer list is
    /// empty. A manifest with no finalizers is removed immediately.
    pub async fn request_delete(&self, id: &ResourceIdentity) -> Result<(), StoreError> {
        {
            let mut manifests = self.manifests.write().await;
            let manifest = manifests.get_mut(id).ok_or_else(|| StoreError::NotFound {
                identity: id.to_string(),
            })?;

            if manifest.meta.finalizers.is_empty() {
                manifests.remove(id);
                tracing::info!(identity = %id, "manifest removed (no finalizers held it)");
            } else {
                manifest.meta.deletion_requested = true;
                manifest.meta.resource_version += 1;
                manifest.meta.updated_at = Timestamp::now();
                tracing::debug!(identity = %id, "deletion requested");
            }
        }
        let _ = self.events.send(id.clone());
        Ok(())
    }

    /// Subscribe to the identities of touched manifests.
    pub fn watch(&self) -> broadcast::Receiver<ResourceIdentity> {
        self.events.subscribe()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestStore for MemoryStore {
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentity,
    ) -> BoxFuture<'a, Result<Option<Manifest>, StoreError>> {
        Box::pin(async move { Ok(self.manifests.read().await.get(id).cloned()) })
    }

    fn commit<'a>(
        &'a self,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>> {
        Box::pin(async move {
            let id = manifest.identity();
            let outcome = {
                let mut manifests = self.manifests.write().await;
                let Some(stored) = manifests.get_mut(&id) else {
                    return Ok(CommitOutcome::Gone);
                };

                if stored.meta.resource_version != manifest.meta.resource_version {
                    return Err(StoreError::VersionConflict {
                        identity: id.to_string(),
                        expected: manifest.meta.resource_version,
                        stored: stored.meta.resource_version,
                    });
                }

                stored.status = manifest.status.clone();
                stored.meta.annotations = manifest.meta.annotations.clone();
                stored.meta.finalizers = manifest.meta.finalizers.clone();
                stored.meta.resource_version += 1;
                stored.meta.updated_at = Timestamp::now();

                if stored.meta.deletion_requested && stored.meta.finalizers.is_empty() {
                    manifests.remove(&id);
                    tracing::info!(identity = %id, "manifest removed after cleanup");
                    CommitOutcome::Removed
                } else {
                    CommitOutcome::Committed {
                        resource_version: stored.meta.resource_version,
                    }
                }
            };
            let _ = self.events.send(id);
            Ok(outcome)
        })
    }
}
