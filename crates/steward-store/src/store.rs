use std::future::Future;
use std::pin::Pin;

use steward_core::identity::ResourceIdentity;
use steward_core::manifest::Manifest;

use crate::error::StoreError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Status and engine-owned metadata written; carries the new resource
    /// version so a pass can write again after an interim commit.
    Committed { resource_version: u64 },
    /// The manifest vanished before the write.
    Gone,
    /// The write released the last finalizer of a deletion-requested
    /// manifest; the store removed it.
    Removed,
}

/// The port the engine reconciles against.
///
/// One store per deployment; the engine holds only a transient working copy
/// per pass and writes back through `commit`.
///
/// Methods return boxed futures for dyn compatibility.
pub trait ManifestStore: Send + Sync {
    /// Fetch one manifest. `None` means it does not exist (or no longer
    /// does).
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentity,
    ) -> BoxFuture<'a, Result<Option<Manifest>, StoreError>>;

    /// Write back the engine-owned fields (status, annotations, finalizers)
    /// if and only if the stored resource version still equals the copy's.
    /// A mismatch is a `StoreError::VersionConflict`; the pass that held the
    /// stale copy must discard its work and re-read.
    fn commit<'a>(
        &'a self,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>>;
}
