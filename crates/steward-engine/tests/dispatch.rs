//! Dispatcher tests: end-to-end convergence through the worker pool,
//! per-identity serialization, cross-identity parallelism, and shutdown.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use common::{
    FakeManager, engine_config, manifest, reconciler_with, wait_for_removal, wait_for_state,
};
use steward_core::state::LifecycleState;
use steward_engine::config::EngineConfig;
use steward_engine::dispatch::Dispatcher;
use steward_engine::manager::{
    ApplyOutcome, BoxFuture, DeleteResult, ManagerError, ResourceManager, VerifyOutcome,
    VerifyResult,
};
use steward_engine::reconcile::Reconciler;
use steward_engine::registry::ManagerRegistry;
use steward_store::memory::MemoryStore;
use steward_store::store::ManifestStore;

/// Manager that gauges pass concurrency. Every operation holds a slot for
/// `delay`, and verify always reports in progress so passes keep coming.
struct GaugedManager {
    kind: String,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl GaugedManager {
    fn new(kind: &str, delay: Duration) -> Self {
        Self {
            kind: kind.to_string(),
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    async fn occupy(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    /// Highest number of operations observed running at once.
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ResourceManager for GaugedManager {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn create<'a>(&'a self, _spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
        Box::pin(async move {
            self.occupy().await;
            Ok(ApplyOutcome::settled())
        })
    }

    fn update<'a>(&'a self, _spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
        Box::pin(async move {
            self.occupy().await;
            Ok(ApplyOutcome::settled())
        })
    }

    fn verify<'a>(
        &'a self,
        _spec: &'a Value,
        _token: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<VerifyOutcome, ManagerError>> {
        Box::pin(async move {
            self.occupy().await;
            Ok(VerifyOutcome::of(VerifyResult::InProgress))
        })
    }

    fn delete<'a>(&'a self, _spec: &'a Value) -> BoxFuture<'a, Result<DeleteResult, ManagerError>> {
        Box::pin(async move {
            self.occupy().await;
            Ok(DeleteResult::Succeeded)
        })
    }
}

fn gauged_reconciler(
    store: &Arc<MemoryStore>,
    manager: &Arc<GaugedManager>,
    config: EngineConfig,
) -> Arc<Reconciler> {
    let mut registry = ManagerRegistry::new();
    registry
        .register(Arc::clone(manager) as Arc<dyn ResourceManager>)
        .unwrap();
    Arc::new(Reconciler::new(
        Arc::clone(store) as Arc<dyn ManifestStore>,
        registry,
        config,
    ))
}

/// An enqueued manifest converges to Succeeded through the worker pool,
/// including the zero-delay requeue between create and verify.
#[tokio::test]
async fn dispatcher_converges_applied_manifests() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(FakeManager::new("database"));
    let handle = Dispatcher::start(Arc::new(reconciler_with(
        Arc::clone(&store),
        Arc::clone(&manager),
    )));

    let id = store
        .apply(manifest("database", "primary", json!({"size": 1})))
        .await
        .identity();
    handle.enqueue(id.clone()).await;

    wait_for_state(&store, &id, LifecycleState::Succeeded).await;
    handle.shutdown().await;
    assert_eq!(manager.calls(), vec!["create", "verify"]);
}

/// Repeated enqueues of one identity, raced against the dispatcher's own
/// requeues, never produce overlapping passes.
#[tokio::test]
async fn passes_for_one_identity_never_overlap() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(GaugedManager::new("database", Duration::from_millis(10)));
    let config = EngineConfig {
        worker_count: 4,
        ..engine_config()
    };
    let handle = Dispatcher::start(gauged_reconciler(&store, &manager, config));

    let id = store
        .apply(manifest("database", "hot", json!({})))
        .await
        .identity();
    for _ in 0..30 {
        handle.enqueue(id.clone()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.shutdown().await;

    assert_eq!(manager.peak(), 1, "one pass at a time per identity");
    assert!(manager.total() >= 2, "coalescing still ran follow-up passes");
}

/// Distinct identities spread across workers and run at the same time.
#[tokio::test]
async fn distinct_identities_run_in_parallel() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(GaugedManager::new("database", Duration::from_millis(50)));
    let handle = Dispatcher::start(gauged_reconciler(&store, &manager, engine_config()));

    let first = store
        .apply(manifest("database", "primary", json!({})))
        .await
        .identity();
    let second = store
        .apply(manifest("database", "replica", json!({})))
        .await
        .identity();
    handle.enqueue(first).await;
    handle.enqueue(second).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while manager.peak() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.shutdown().await;
    assert!(manager.peak() >= 2, "two workers should overlap distinct identities");
}

/// Shutdown returns promptly when workers are idle in the queue wait.
#[tokio::test]
async fn shutdown_drains_idle_workers() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(FakeManager::new("database"));
    let handle = Dispatcher::start(Arc::new(reconciler_with(store, manager)));

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("shutdown should not hang");
}

/// Store events pumped into the queue are enough to drive the full life of
/// a manifest: apply converges it, a deletion request removes it.
#[tokio::test]
async fn watch_events_drive_convergence() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(FakeManager::new("database"));
    let handle = Dispatcher::start(Arc::new(reconciler_with(
        Arc::clone(&store),
        Arc::clone(&manager),
    )));

    let queue = Arc::clone(handle.queue());
    let mut events = store.watch();
    let pump = tokio::spawn(async move {
        while let Ok(id) = events.recv().await {
            queue.enqueue(id).await;
        }
    });

    let id = store
        .apply(manifest("database", "primary", json!({"size": 1})))
        .await
        .identity();
    wait_for_state(&store, &id, LifecycleState::Succeeded).await;

    store.request_delete(&id).await.unwrap();
    wait_for_removal(&store, &id).await;

    handle.shutdown().await;
    pump.abort();
    assert_eq!(manager.calls(), vec!["create", "verify", "delete"]);
}
