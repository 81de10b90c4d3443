//! The reconcile pass: one load-act-commit cycle per resource identity.
//!
//! Each pass loads the manifest, derives the operation its lifecycle state
//! calls for, runs it against the resource manager under a timeout, and
//! writes the resulting status back through the store's optimistic commit.
//! Transient failures requeue with backoff and leave the state untouched;
//! only permission denials and explicit manager errors settle a resource
//! as Failed.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use steward_core::annotations;
use steward_core::identity::ResourceIdentity;
use steward_core::manifest::{Manifest, Status};
use steward_core::permissions::{Operation, PermissionSet};
use steward_core::state::LifecycleState;
use steward_store::error::StoreError;
use steward_store::store::{CommitOutcome, ManifestStore};

use crate::backoff::BackoffTracker;
use crate::config::EngineConfig;
use crate::deps::{self, DependencyStatus};
use crate::error::EngineError;
use crate::manager::{ApplyOutcome, DeleteResult, ManagerError, ResourceManager, VerifyResult};
use crate::policy;
use crate::registry::ManagerRegistry;

/// What one pass decided about scheduling the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// When to run this identity again. `None` means the resource is
    /// settled and nothing is scheduled.
    pub requeue_after: Option<Duration>,
    /// Whether the pass changed the lifecycle state or removed the
    /// manifest.
    pub transitioned: bool,
}

impl ReconcileOutcome {
    /// A finished pass with nothing further scheduled.
    pub fn done() -> Self {
        Self {
            requeue_after: None,
            transitioned: false,
        }
    }
}

/// Scheduling directive produced by a state handler.
enum Requeue {
    /// Settled; nothing scheduled.
    No,
    /// Another state wants handling immediately.
    Now,
    /// Retry on the identity's exponential backoff curve.
    Backoff,
    /// Re-check after a fixed interval.
    Fixed(Duration),
}

/// What a state handler decided: continue to write-back with a requeue
/// directive, or halt the pass with a finished outcome.
enum Step {
    Next(Requeue),
    Halt(ReconcileOutcome),
}

/// Last-committed view of the engine-owned fields, used to decide whether
/// a pass needs a write-back at all.
struct Snapshot {
    status: Status,
    annotations: BTreeMap<String, String>,
    finalizers: Vec<String>,
}

impl Snapshot {
    fn of(manifest: &Manifest) -> Self {
        Self {
            status: manifest.status.clone(),
            annotations: manifest.meta.annotations.clone(),
            finalizers: manifest.meta.finalizers.clone(),
        }
    }

    fn differs_from(&self, manifest: &Manifest) -> bool {
        manifest.status != self.status
            || manifest.meta.annotations != self.annotations
            || manifest.meta.finalizers != self.finalizers
    }
}

/// The state machine driver. One instance serves every resource kind; the
/// dispatcher serializes passes per identity around it.
pub struct Reconciler {
    store: Arc<dyn ManifestStore>,
    registry: ManagerRegistry,
    config: EngineConfig,
    backoff: BackoffTracker,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        registry: ManagerRegistry,
        config: EngineConfig,
    ) -> Self {
        let backoff = BackoffTracker::new(config.backoff.clone());
        Self {
            store,
            registry,
            config,
            backoff,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Delay before retrying an identity whose pass returned an error.
    pub fn retry_delay(&self, id: &ResourceIdentity) -> Duration {
        self.backoff.next_delay(id)
    }

    /// Run one pass for the given identity.
    pub async fn reconcile(&self, id: &ResourceIdentity) -> Result<ReconcileOutcome, EngineError> {
        let Some(mut manifest) = self.store.get(id).await? else {
            tracing::debug!(identity = %id, "manifest gone, nothing to reconcile");
            self.backoff.reset(id);
            return Ok(ReconcileOutcome::done());
        };

        let entry_state = manifest.status.state;
        let mut snapshot = Snapshot::of(&manifest);

        if manifest.meta.deletion_requested && entry_state != LifecycleState::Terminating {
            tracing::info!(identity = %id, "deletion requested, terminating");
            manifest.status.state = LifecycleState::Terminating;
        }

        if !manifest.status.state.is_settled() {
            manifest.status.observed_generation = manifest.meta.generation;
        }

        let step = match manifest.status.state {
            LifecycleState::Pending => self.step_pending(&mut manifest, &mut snapshot).await?,
            LifecycleState::Creating => self.step_creating(&mut manifest).await?,
            LifecycleState::Updating => self.step_updating(&mut manifest).await?,
            LifecycleState::Verifying => self.step_verifying(&mut manifest).await?,
            LifecycleState::Recreating => self.step_recreating(&mut manifest).await?,
            LifecycleState::Succeeded => self.step_succeeded(&mut manifest).await?,
            LifecycleState::Failed => self.step_failed(&mut manifest),
            LifecycleState::Terminating => self.step_terminating(&mut manifest).await?,
        };

        let requeue = match step {
            Step::Next(requeue) => requeue,
            Step::Halt(outcome) => return Ok(outcome),
        };

        if let Some(outcome) = self.write_back(&mut manifest, &mut snapshot).await? {
            return Ok(outcome);
        }

        let requeue_after = match requeue {
            Requeue::No => None,
            Requeue::Now => Some(Duration::ZERO),
            Requeue::Backoff => Some(self.backoff.next_delay(id)),
            Requeue::Fixed(delay) => Some(delay),
        };
        Ok(ReconcileOutcome {
            requeue_after,
            transitioned: manifest.status.state != entry_state,
        })
    }

    /// Pending: gate on dependencies and the create permission, then make
    /// the finalizer durable before the first external call.
    async fn step_pending(
        &self,
        manifest: &mut Manifest,
        snapshot: &mut Snapshot,
    ) -> Result<Step, EngineError> {
        match deps::resolve(self.store.as_ref(), manifest).await? {
            DependencyStatus::Ready => {}
            blocked => {
                tracing::debug!(identity = %manifest.identity(), "dependencies not ready");
                manifest.status.reason = blocked.reason();
                return Ok(Step::Next(Requeue::Fixed(self.config.pending_requeue())));
            }
        }

        let Some(permissions) = self.permissions_or_fail(manifest) else {
            return Ok(Step::Next(Requeue::No));
        };
        if !permissions.allows(Operation::Create) {
            self.fail(
                manifest,
                policy::denial_reason(Operation::Create, permissions),
            );
            return Ok(Step::Next(Requeue::No));
        }

        let Some(manager) = self.registry.get(&manifest.kind) else {
            let reason = format!("no manager registered for kind {:?}", manifest.kind);
            self.fail(manifest, reason);
            return Ok(Step::Next(Requeue::No));
        };

        // The finalizer must be durable before the external create is
        // issued, otherwise a crash in between leaks the external resource.
        manifest.add_finalizer(annotations::CLEANUP_FINALIZER);
        manifest.status.state = LifecycleState::Creating;
        manifest.status.reason = None;
        if let Some(outcome) = self.write_back(manifest, snapshot).await? {
            return Ok(Step::Halt(outcome));
        }

        tracing::info!(identity = %manifest.identity(), "creating external resource");
        let result = self
            .with_timeout("create", manager.create(&manifest.spec))
            .await;
        Ok(Step::Next(self.map_apply(manifest, Operation::Create, result)))
    }

    /// Creating: a prior pass committed the intent but the create call did
    /// not complete; retry it.
    async fn step_creating(&self, manifest: &mut Manifest) -> Result<Step, EngineError> {
        let Some(permissions) = self.permissions_or_fail(manifest) else {
            return Ok(Step::Next(Requeue::No));
        };
        if !permissions.allows(Operation::Create) {
            self.fail(
                manifest,
                policy::denial_reason(Operation::Create, permissions),
            );
            return Ok(Step::Next(Requeue::No));
        }
        let Some(manager) = self.registry.get(&manifest.kind) else {
            let reason = format!("no manager registered for kind {:?}", manifest.kind);
            self.fail(manifest, reason);
            return Ok(Step::Next(Requeue::No));
        };

        tracing::info!(identity = %manifest.identity(), "creating external resource");
        let result = self
            .with_timeout("create", manager.create(&manifest.spec))
            .await;
        Ok(Step::Next(self.map_apply(manifest, Operation::Create, result)))
    }

    async fn step_updating(&self, manifest: &mut Manifest) -> Result<Step, EngineError> {
        let Some(permissions) = self.permissions_or_fail(manifest) else {
            return Ok(Step::Next(Requeue::No));
        };
        if !permissions.allows(Operation::Update) {
            self.fail(
                manifest,
                policy::denial_reason(Operation::Update, permissions),
            );
            return Ok(Step::Next(Requeue::No));
        }
        let Some(manager) = self.registry.get(&manifest.kind) else {
            let reason = format!("no manager registered for kind {:?}", manifest.kind);
            self.fail(manifest, reason);
            return Ok(Step::Next(Requeue::No));
        };

        tracing::info!(identity = %manifest.identity(), "updating external resource");
        let result = self
            .with_timeout("update", manager.update(&manifest.spec))
            .await;
        Ok(Step::Next(self.map_apply(manifest, Operation::Update, result)))
    }

    /// Verifying: ask the manager how the external resource compares to the
    /// spec and map its verdict onto the next state.
    async fn step_verifying(&self, manifest: &mut Manifest) -> Result<Step, EngineError> {
        let Some(manager) = self.registry.get(&manifest.kind) else {
            let reason = format!("no manager registered for kind {:?}", manifest.kind);
            self.fail(manifest, reason);
            return Ok(Step::Next(Requeue::No));
        };

        let token = manifest.status.token.clone();
        let result = self
            .with_timeout("verify", manager.verify(&manifest.spec, token.as_ref()))
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) if err.is_transient() => {
                tracing::warn!(identity = %manifest.identity(), error = %err, "verify failed, retrying");
                return Ok(Step::Next(Requeue::Backoff));
            }
            Err(err) => {
                self.fail(manifest, format!("verify failed: {err}"));
                return Ok(Step::Next(Requeue::No));
            }
        };
        if let Some(token) = outcome.token {
            manifest.status.token = Some(token);
        }

        Ok(Step::Next(match outcome.result {
            VerifyResult::Missing => {
                tracing::info!(identity = %manifest.identity(), "external resource missing, restarting");
                manifest.status.state = LifecycleState::Pending;
                manifest.status.reason = Some("external resource missing".to_string());
                Requeue::Now
            }
            VerifyResult::InProgress => {
                tracing::debug!(identity = %manifest.identity(), "external resource still converging");
                Requeue::Backoff
            }
            VerifyResult::Ready => self.settle_ready(manifest),
            VerifyResult::UpdateRequired => self.gate_update(manifest),
            VerifyResult::RecreateRequired => self.gate_recreate(manifest),
            VerifyResult::Deleting => {
                tracing::info!(identity = %manifest.identity(), "external resource is being deleted");
                manifest.status.state = LifecycleState::Terminating;
                Requeue::Now
            }
        }))
    }

    /// Recreating: tear the external resource down and build it again from
    /// the current spec within the same pass.
    async fn step_recreating(&self, manifest: &mut Manifest) -> Result<Step, EngineError> {
        let Some(permissions) = self.permissions_or_fail(manifest) else {
            return Ok(Step::Next(Requeue::No));
        };
        if !(permissions.allows(Operation::Delete) && permissions.allows(Operation::Create)) {
            self.fail(
                manifest,
                format!("recreate not permitted (granted: {permissions})"),
            );
            return Ok(Step::Next(Requeue::No));
        }
        let Some(manager) = self.registry.get(&manifest.kind) else {
            let reason = format!("no manager registered for kind {:?}", manifest.kind);
            self.fail(manifest, reason);
            return Ok(Step::Next(Requeue::No));
        };

        tracing::info!(identity = %manifest.identity(), "recreating external resource");
        let deleted = self
            .with_timeout("delete", manager.delete(&manifest.spec))
            .await;
        match deleted {
            Ok(DeleteResult::Succeeded) => {
                let result = self
                    .with_timeout("create", manager.create(&manifest.spec))
                    .await;
                Ok(Step::Next(self.map_apply(
                    manifest,
                    Operation::Create,
                    result,
                )))
            }
            Ok(DeleteResult::InProgress) => {
                tracing::debug!(identity = %manifest.identity(), "external delete still running");
                Ok(Step::Next(Requeue::Backoff))
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(identity = %manifest.identity(), error = %err, "delete failed, retrying");
                Ok(Step::Next(Requeue::Backoff))
            }
            Err(err) => {
                self.fail(manifest, format!("delete failed: {err}"));
                Ok(Step::Next(Requeue::No))
            }
        }
    }

    /// Succeeded: watch for spec changes and, when resync is configured,
    /// re-verify periodically to catch external drift.
    async fn step_succeeded(&self, manifest: &mut Manifest) -> Result<Step, EngineError> {
        if manifest.meta.generation != manifest.status.observed_generation {
            tracing::info!(identity = %manifest.identity(), "spec changed, re-verifying");
            manifest.status.state = LifecycleState::Verifying;
            manifest.status.reason = None;
            return Ok(Step::Next(Requeue::Now));
        }

        let Some(interval) = self.config.resync_interval() else {
            return Ok(Step::Next(Requeue::No));
        };

        let Some(manager) = self.registry.get(&manifest.kind) else {
            let reason = format!("no manager registered for kind {:?}", manifest.kind);
            self.fail(manifest, reason);
            return Ok(Step::Next(Requeue::No));
        };

        let token = manifest.status.token.clone();
        let result = self
            .with_timeout("verify", manager.verify(&manifest.spec, token.as_ref()))
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) if err.is_transient() => {
                tracing::warn!(identity = %manifest.identity(), error = %err, "resync verify failed, retrying");
                return Ok(Step::Next(Requeue::Backoff));
            }
            Err(err) => {
                self.fail(manifest, format!("verify failed: {err}"));
                return Ok(Step::Next(Requeue::No));
            }
        };
        if let Some(token) = outcome.token {
            manifest.status.token = Some(token);
        }

        match outcome.result {
            VerifyResult::Ready => {
                tracing::debug!(identity = %manifest.identity(), "resync found no drift");
                Ok(Step::Next(Requeue::Fixed(interval)))
            }
            verdict => {
                tracing::info!(identity = %manifest.identity(), verdict = ?verdict, "drift detected, re-verifying");
                manifest.status.state = LifecycleState::Verifying;
                manifest.status.reason = None;
                Ok(Step::Next(Requeue::Now))
            }
        }
    }

    /// Failed: terminal until the spec changes.
    fn step_failed(&self, manifest: &mut Manifest) -> Step {
        if manifest.meta.generation != manifest.status.observed_generation {
            tracing::info!(identity = %manifest.identity(), "spec changed, restarting from pending");
            manifest.status.state = LifecycleState::Pending;
            manifest.status.reason = None;
            return Step::Next(Requeue::Now);
        }
        Step::Next(Requeue::No)
    }

    /// Terminating: drive external cleanup, then release the finalizer.
    /// Nothing here settles as Failed; a stuck delete keeps retrying so the
    /// finalizer never outlives a reachable cleanup path.
    async fn step_terminating(&self, manifest: &mut Manifest) -> Result<Step, EngineError> {
        if !manifest.has_finalizer(annotations::CLEANUP_FINALIZER) {
            // Nothing holds the manifest; the store can collect it.
            return Ok(Step::Next(Requeue::No));
        }

        let permissions = match policy::permissions_for(manifest) {
            Ok(permissions) => permissions,
            Err(err) => {
                tracing::warn!(identity = %manifest.identity(), error = %err, "invalid access permissions during cleanup");
                manifest.status.reason = Some(format!("invalid access permissions: {err}"));
                return Ok(Step::Next(Requeue::Backoff));
            }
        };
        if !permissions.allows(Operation::Delete) {
            tracing::info!(identity = %manifest.identity(), "delete not permitted, releasing without external cleanup");
            manifest.remove_finalizer(annotations::CLEANUP_FINALIZER);
            manifest.status.reason = None;
            return Ok(Step::Next(Requeue::No));
        }

        let Some(manager) = self.registry.get(&manifest.kind) else {
            tracing::warn!(identity = %manifest.identity(), kind = %manifest.kind, "no manager registered, cannot clean up");
            manifest.status.reason = Some(format!(
                "no manager registered for kind {:?}",
                manifest.kind
            ));
            return Ok(Step::Next(Requeue::Backoff));
        };

        tracing::info!(identity = %manifest.identity(), "deleting external resource");
        let result = self
            .with_timeout("delete", manager.delete(&manifest.spec))
            .await;
        match result {
            Ok(DeleteResult::Succeeded) => {
                tracing::info!(identity = %manifest.identity(), "external cleanup complete");
                manifest.remove_finalizer(annotations::CLEANUP_FINALIZER);
                manifest.status.reason = None;
                Ok(Step::Next(Requeue::No))
            }
            Ok(DeleteResult::InProgress) => {
                tracing::debug!(identity = %manifest.identity(), "external delete still running");
                Ok(Step::Next(Requeue::Backoff))
            }
            Err(err) => {
                // Both error classes retry here: dropping the finalizer on
                // a failed delete would leak the external resource.
                tracing::warn!(identity = %manifest.identity(), error = %err, "delete failed, keeping finalizer");
                manifest.status.reason = Some(format!("delete failed: {err}"));
                Ok(Step::Next(Requeue::Backoff))
            }
        }
    }

    /// Shared result mapping for create and update calls. Both land in
    /// Verifying on success so the external system gets one confirming
    /// look before the resource settles.
    fn map_apply(
        &self,
        manifest: &mut Manifest,
        op: Operation,
        result: Result<ApplyOutcome, ManagerError>,
    ) -> Requeue {
        match result {
            Ok(outcome) => {
                tracing::debug!(
                    identity = %manifest.identity(),
                    operation = %op,
                    result = ?outcome.result,
                    "spec applied to external resource"
                );
                self.record_applied(manifest, outcome.token);
                manifest.status.state = LifecycleState::Verifying;
                manifest.status.reason = None;
                Requeue::Now
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    identity = %manifest.identity(),
                    operation = %op,
                    error = %err,
                    "transient failure, retrying"
                );
                Requeue::Backoff
            }
            Err(err) => {
                self.fail(manifest, format!("{op} failed: {err}"));
                Requeue::No
            }
        }
    }

    /// A verify reported ready: settle as Succeeded, unless the recorded
    /// last-applied spec disagrees with the current one, in which case the
    /// declared state moved and an update is due.
    fn settle_ready(&self, manifest: &mut Manifest) -> Requeue {
        if let Some(raw) = manifest.annotation(annotations::LAST_APPLIED_SPEC) {
            let drifted = match annotations::decode_last_applied(raw) {
                Ok(applied) => applied != manifest.spec,
                Err(err) => {
                    tracing::warn!(identity = %manifest.identity(), error = %err, "unreadable last-applied record");
                    true
                }
            };
            if drifted {
                tracing::info!(identity = %manifest.identity(), "declared spec changed since last apply");
                return self.gate_update(manifest);
            }
        }
        manifest.status.state = LifecycleState::Succeeded;
        manifest.status.reason = None;
        match self.config.resync_interval() {
            Some(interval) => Requeue::Fixed(interval),
            None => Requeue::No,
        }
    }

    fn gate_update(&self, manifest: &mut Manifest) -> Requeue {
        let Some(permissions) = self.permissions_or_fail(manifest) else {
            return Requeue::No;
        };
        if !permissions.allows(Operation::Update) {
            self.fail(
                manifest,
                policy::denial_reason(Operation::Update, permissions),
            );
            return Requeue::No;
        }
        manifest.status.state = LifecycleState::Updating;
        manifest.status.reason = None;
        Requeue::Now
    }

    fn gate_recreate(&self, manifest: &mut Manifest) -> Requeue {
        let Some(permissions) = self.permissions_or_fail(manifest) else {
            return Requeue::No;
        };
        if !(permissions.allows(Operation::Delete) && permissions.allows(Operation::Create)) {
            self.fail(
                manifest,
                format!("recreate not permitted (granted: {permissions})"),
            );
            return Requeue::No;
        }
        manifest.status.state = LifecycleState::Recreating;
        manifest.status.reason = None;
        Requeue::Now
    }

    fn permissions_or_fail(&self, manifest: &mut Manifest) -> Option<PermissionSet> {
        match policy::permissions_for(manifest) {
            Ok(permissions) => Some(permissions),
            Err(err) => {
                self.fail(manifest, format!("invalid access permissions: {err}"));
                None
            }
        }
    }

    /// Record what a successful create or update applied: the manager's
    /// token, and the spec itself for later drift diffing.
    fn record_applied(&self, manifest: &mut Manifest, token: Option<Value>) {
        if let Some(token) = token {
            manifest.status.token = Some(token);
        }
        match annotations::encode_last_applied(&manifest.spec) {
            Ok(encoded) => manifest.set_annotation(annotations::LAST_APPLIED_SPEC, encoded),
            Err(err) => {
                tracing::warn!(identity = %manifest.identity(), error = %err, "could not record applied spec");
            }
        }
    }

    fn fail(&self, manifest: &mut Manifest, reason: String) {
        tracing::warn!(identity = %manifest.identity(), reason = %reason, "resource failed");
        manifest.status.state = LifecycleState::Failed;
        manifest.status.reason = Some(reason);
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, ManagerError>>,
    ) -> Result<T, ManagerError> {
        match tokio::time::timeout(self.config.operation_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(ManagerError::Transient(format!(
                "{operation} timed out after {}ms",
                self.config.operation_timeout_ms
            ))),
        }
    }

    /// Push the working copy back if anything engine-owned changed.
    /// `Some(outcome)` means the pass is over: the manifest was collected,
    /// vanished, or was rewritten underneath us.
    async fn write_back(
        &self,
        manifest: &mut Manifest,
        snapshot: &mut Snapshot,
    ) -> Result<Option<ReconcileOutcome>, EngineError> {
        if !snapshot.differs_from(manifest) {
            return Ok(None);
        }
        let id = manifest.identity();
        match self.store.commit(manifest).await {
            Ok(CommitOutcome::Committed { resource_version }) => {
                manifest.meta.resource_version = resource_version;
                if manifest.status.state != snapshot.status.state {
                    self.backoff.reset(&id);
                    tracing::info!(
                        identity = %id,
                        from = %snapshot.status.state,
                        to = %manifest.status.state,
                        "lifecycle transition"
                    );
                }
                *snapshot = Snapshot::of(manifest);
                Ok(None)
            }
            Ok(CommitOutcome::Removed) => {
                tracing::debug!(identity = %id, "manifest collected after final write");
                self.backoff.reset(&id);
                Ok(Some(ReconcileOutcome {
                    requeue_after: None,
                    transitioned: true,
                }))
            }
            Ok(CommitOutcome::Gone) => {
                tracing::debug!(identity = %id, "manifest vanished during pass");
                self.backoff.reset(&id);
                Ok(Some(ReconcileOutcome::done()))
            }
            Err(StoreError::VersionConflict { .. }) => {
                tracing::warn!(identity = %id, "manifest changed while reconciling, retrying");
                Ok(Some(ReconcileOutcome {
                    requeue_after: Some(Duration::ZERO),
                    transitioned: false,
                }))
            }
            Err(err) => Err(err.into()),
        }
    }
}
