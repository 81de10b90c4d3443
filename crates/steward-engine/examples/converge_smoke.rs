//! Smoke demo for the reconciliation engine against a simulated external
//! system.
//!
//! Applies two manifests (a database, and a cache that depends on it),
//! lets the dispatcher converge them off store events, pushes a spec
//! change through the update path, and tears everything down.
//!
//! Usage:
//!   cargo run -p steward-engine --example converge_smoke

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use steward_core::identity::ResourceIdentity;
use steward_core::manifest::Manifest;
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

/// Stand-in for an external system: one record per resource, keyed by the
/// spec's `name` field.
struct SimManager {
    kind: String,
    records: Mutex<HashMap<String, Value>>,
}

impl SimManager {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, name: &str) -> Option<Value> {
        self.records.lock().unwrap().get(name).cloned()
    }
}

fn record_key(spec: &Value) -> String {
    spec.get("name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed")
        .to_string()
}

impl ResourceManager for SimManager {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn create<'a>(&'a self, spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
        Box::pin(async move {
            let key = record_key(spec);
            tracing::info!(kind = %self.kind, name = %key, "sim: provisioning");
            self.records.lock().unwrap().insert(key, spec.clone());
            Ok(ApplyOutcome::settled())
        })
    }

    fn update<'a>(&'a self, spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
        Box::pin(async move {
            let key = record_key(spec);
            tracing::info!(kind = %self.kind, name = %key, "sim: updating");
            self.records.lock().unwrap().insert(key, spec.clone());
            Ok(ApplyOutcome::settled())
        })
    }

    fn verify<'a>(
        &'a self,
        spec: &'a Value,
        _token: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<VerifyOutcome, ManagerError>> {
        Box::pin(async move {
            let verdict = match self.records.lock().unwrap().get(&record_key(spec)) {
                None => VerifyResult::Missing,
                Some(stored) if stored != spec => VerifyResult::UpdateRequired,
                Some(_) => VerifyResult::Ready,
            };
            Ok(VerifyOutcome::of(verdict))
        })
    }

    fn delete<'a>(&'a self, spec: &'a Value) -> BoxFuture<'a, Result<DeleteResult, ManagerError>> {
        Box::pin(async move {
            let key = record_key(spec);
            tracing::info!(kind = %self.kind, name = %key, "sim: deleting");
            self.records.lock().unwrap().remove(&key);
            Ok(DeleteResult::Succeeded)
        })
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = EngineConfig {
        worker_count: 2,
        pending_requeue_ms: 250,
        ..EngineConfig::default()
    };

    println!("╔══════════════════════════════════════════════════╗");
    println!("║           Steward — Convergence Demo             ║");
    println!("╠══════════════════════════════════════════════════╣");
    println!("║  Workers:     {:<34} ║", config.worker_count);
    println!("║  Kinds:       {:<34} ║", "database, cache");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    let store = Arc::new(MemoryStore::new());
    let database_cloud = Arc::new(SimManager::new("database"));
    let cache_cloud = Arc::new(SimManager::new("cache"));

    let mut registry = ManagerRegistry::new();
    registry.register(Arc::clone(&database_cloud) as Arc<dyn ResourceManager>)?;
    registry.register(Arc::clone(&cache_cloud) as Arc<dyn ResourceManager>)?;

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store) as Arc<dyn ManifestStore>,
        registry,
        config,
    ));
    let handle = Dispatcher::start(reconciler);

    // Couple store events to the dispatcher so applying a manifest is all
    // it takes to start a pass.
    let queue = Arc::clone(handle.queue());
    let mut events = store.watch();
    let pump = tokio::spawn(async move {
        while let Ok(id) = events.recv().await {
            queue.enqueue(id).await;
        }
    });

    println!("Step 1: apply a database and a cache that depends on it...");
    let database = store
        .apply(Manifest::new(
            "database",
            "demo",
            "orders-db",
            json!({"name": "orders-db", "engine": "postgres", "storage_gb": 50}),
        ))
        .await;
    let cache = store
        .apply(
            Manifest::new(
                "cache",
                "demo",
                "orders-cache",
                json!({"name": "orders-cache", "memory_mb": 512}),
            )
            .with_dependency(database.identity()),
        )
        .await;

    let settled_db = settle(&store, &database.identity(), database.meta.generation).await?;
    let settled_cache = settle(&store, &cache.identity(), cache.meta.generation).await?;
    println!("  ✅ {}  {}", database.identity(), settled_db.status.state);
    println!("  ✅ {}  {}", cache.identity(), settled_cache.status.state);
    println!(
        "  sim records: database={}, cache={}",
        database_cloud.record("orders-db").is_some(),
        cache_cloud.record("orders-cache").is_some()
    );
    println!();

    println!("Step 2: grow the database and let the engine push the change...");
    let database = store
        .apply(Manifest::new(
            "database",
            "demo",
            "orders-db",
            json!({"name": "orders-db", "engine": "postgres", "storage_gb": 100}),
        ))
        .await;
    settle(&store, &database.identity(), database.meta.generation).await?;
    let record = database_cloud
        .record("orders-db")
        .ok_or_else(|| eyre::eyre!("sim record disappeared"))?;
    println!("  ✅ external record now holds storage_gb={}", record["storage_gb"]);
    println!();

    println!("Step 3: request deletion and wait for cleanup...");
    store.request_delete(&cache.identity()).await?;
    store.request_delete(&database.identity()).await?;
    gone(&store, &cache.identity()).await?;
    gone(&store, &database.identity()).await?;
    println!(
        "  ✅ manifests collected, sim records removed: database={}, cache={}",
        database_cloud.record("orders-db").is_none(),
        cache_cloud.record("orders-cache").is_none()
    );
    println!();

    handle.shutdown().await;
    pump.abort();

    println!("Demo complete: declared state drove the external system end to end.");
    Ok(())
}

/// Poll until the manifest settles at the given generation.
async fn settle(
    store: &MemoryStore,
    id: &ResourceIdentity,
    generation: u64,
) -> eyre::Result<Manifest> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(manifest) = store.get(id).await? {
            if manifest.status.observed_generation == generation
                && manifest.status.state.is_settled()
            {
                if manifest.status.state == LifecycleState::Failed {
                    eyre::bail!("{id} failed: {:?}", manifest.status.reason);
                }
                return Ok(manifest);
            }
        }
        if tokio::time::Instant::now() > deadline {
            eyre::bail!("timed out waiting for {id} to settle");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the manifest is removed from the store.
async fn gone(store: &MemoryStore, id: &ResourceIdentity) -> eyre::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if store.get(id).await?.is_none() {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            eyre::bail!("timed out waiting for {id} to be removed");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
