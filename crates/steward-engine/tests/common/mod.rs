#![allow(dead_code)]

//! Shared fixtures: a scriptable manager, a store wrapper that injects
//! version conflicts, and fast engine settings.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use steward_core::identity::ResourceIdentity;
use steward_core::manifest::Manifest;
use steward_core::state::LifecycleState;
use steward_engine::backoff::BackoffPolicy;
use steward_engine::config::EngineConfig;
use steward_engine::manager::{
    ApplyOutcome, BoxFuture, DeleteResult, ManagerError, ResourceManager, VerifyOutcome,
    VerifyResult,
};
use steward_engine::reconcile::{ReconcileOutcome, Reconciler};
use steward_engine::registry::ManagerRegistry;
use steward_store::error::StoreError;
use steward_store::memory::MemoryStore;
use steward_store::store::{CommitOutcome, ManifestStore};

/// One scripted response for a manager operation. `Hang` never resolves,
/// which exercises the engine's operation timeout.
pub enum Script<T> {
    Respond(Result<T, ManagerError>),
    Hang,
}

/// Scriptable manager: responses are queued per operation and consumed in
/// order; an empty queue falls back to the happy path (create and update
/// settle, verify reports ready, delete succeeds).
pub struct FakeManager {
    kind: String,
    calls: Mutex<Vec<String>>,
    create_script: Mutex<VecDeque<Script<ApplyOutcome>>>,
    update_script: Mutex<VecDeque<Script<ApplyOutcome>>>,
    verify_script: Mutex<VecDeque<Script<VerifyOutcome>>>,
    delete_script: Mutex<VecDeque<Script<DeleteResult>>>,
    verify_tokens: Mutex<Vec<Option<Value>>>,
}

impl FakeManager {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            calls: Mutex::new(Vec::new()),
            create_script: Mutex::new(VecDeque::new()),
            update_script: Mutex::new(VecDeque::new()),
            verify_script: Mutex::new(VecDeque::new()),
            delete_script: Mutex::new(VecDeque::new()),
            verify_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn script_create(&self, script: Script<ApplyOutcome>) {
        self.create_script.lock().unwrap().push_back(script);
    }

    pub fn script_update(&self, script: Script<ApplyOutcome>) {
        self.update_script.lock().unwrap().push_back(script);
    }

    pub fn script_verify(&self, script: Script<VerifyOutcome>) {
        self.verify_script.lock().unwrap().push_back(script);
    }

    pub fn script_delete(&self, script: Script<DeleteResult>) {
        self.delete_script.lock().unwrap().push_back(script);
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// The token passed into each verify call, in order.
    pub fn verify_tokens(&self) -> Vec<Option<Value>> {
        self.verify_tokens.lock().unwrap().clone()
    }

    fn record(&self, op: &str) {
        self.calls.lock().unwrap().push(op.to_string());
    }
}

impl ResourceManager for FakeManager {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn create<'a>(&'a self, _spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
        Box::pin(async move {
            self.record("create");
            let script = self.create_script.lock().unwrap().pop_front();
            match script {
                Some(Script::Respond(result)) => result,
                Some(Script::Hang) => std::future::pending().await,
                None => Ok(ApplyOutcome::settled()),
            }
        })
    }

    fn update<'a>(&'a self, _spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
        Box::pin(async move {
            self.record("update");
            let script = self.update_script.lock().unwrap().pop_front();
            match script {
                Some(Script::Respond(result)) => result,
                Some(Script::Hang) => std::future::pending().await,
                None => Ok(ApplyOutcome::settled()),
            }
        })
    }

    fn verify<'a>(
        &'a self,
        _spec: &'a Value,
        token: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<VerifyOutcome, ManagerError>> {
        Box::pin(async move {
            self.record("verify");
            self.verify_tokens.lock().unwrap().push(token.cloned());
            let script = self.verify_script.lock().unwrap().pop_front();
            match script {
                Some(Script::Respond(result)) => result,
                Some(Script::Hang) => std::future::pending().await,
                None => Ok(VerifyOutcome::of(VerifyResult::Ready)),
            }
        })
    }

    fn delete<'a>(&'a self, _spec: &'a Value) -> BoxFuture<'a, Result<DeleteResult, ManagerError>> {
        Box::pin(async move {
            self.record("delete");
            let script = self.delete_script.lock().unwrap().pop_front();
            match script {
                Some(Script::Respond(result)) => result,
                Some(Script::Hang) => std::future::pending().await,
                None => Ok(DeleteResult::Succeeded),
            }
        })
    }
}

/// Store wrapper that rejects the next `n` commits with a version conflict
/// before delegating to the wrapped store.
pub struct ConflictingStore {
    inner: Arc<MemoryStore>,
    conflicts_left: Mutex<u32>,
}

impl ConflictingStore {
    pub fn new(inner: Arc<MemoryStore>, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_left: Mutex::new(conflicts),
        }
    }

    /// Make the next `n` commits conflict.
    pub fn arm(&self, n: u32) {
        *self.conflicts_left.lock().unwrap() = n;
    }
}

impl ManifestStore for ConflictingStore {
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentity,
    ) -> BoxFuture<'a, Result<Option<Manifest>, StoreError>> {
        self.inner.get(id)
    }

    fn commit<'a>(
        &'a self,
        manifest: &'a Manifest,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>> {
        Box::pin(async move {
            {
                let mut left = self.conflicts_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(StoreError::VersionConflict {
                        identity: manifest.identity().to_string(),
                        expected: manifest.meta.resource_version,
                        stored: manifest.meta.resource_version + 1,
                    });
                }
            }
            self.inner.commit(manifest).await
        })
    }
}

/// Tight timings so retry and requeue paths run in milliseconds.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        worker_count: 2,
        operation_timeout_ms: 200,
        pending_requeue_ms: 10,
        backoff: BackoffPolicy {
            base_ms: 1,
            factor: 2.0,
            cap_ms: 50,
            jitter: 0.0,
        },
        resync_interval_ms: None,
    }
}

pub fn reconciler_with(store: Arc<MemoryStore>, manager: Arc<FakeManager>) -> Reconciler {
    reconciler_with_config(store, manager, engine_config())
}

pub fn reconciler_with_config(
    store: Arc<MemoryStore>,
    manager: Arc<FakeManager>,
    config: EngineConfig,
) -> Reconciler {
    let mut registry = ManagerRegistry::new();
    registry.register(manager).unwrap();
    Reconciler::new(store, registry, config)
}

pub fn manifest(kind: &str, name: &str, spec: Value) -> Manifest {
    Manifest::new(kind, "default", name, spec)
}

pub async fn stored(store: &MemoryStore, id: &ResourceIdentity) -> Manifest {
    store
        .get(id)
        .await
        .expect("store read")
        .expect("manifest present")
}

pub async fn state_of(store: &MemoryStore, id: &ResourceIdentity) -> LifecycleState {
    stored(store, id).await.status.state
}

/// Run passes back to back, honoring requeue delays, until the resource
/// settles or the pass limit runs out.
pub async fn converge(
    reconciler: &Reconciler,
    id: &ResourceIdentity,
    max_passes: usize,
) -> ReconcileOutcome {
    let mut last = ReconcileOutcome::done();
    for _ in 0..max_passes {
        last = reconciler.reconcile(id).await.expect("reconcile pass");
        match last.requeue_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => return last,
        }
    }
    last
}

pub async fn wait_for_state(store: &MemoryStore, id: &ResourceIdentity, want: LifecycleState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(Some(current)) = store.get(id).await {
            if current.status.state == want {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for state {want}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_removal(store: &MemoryStore, id: &ResourceIdentity) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if store.get(id).await.expect("store read").is_none() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for removal"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
