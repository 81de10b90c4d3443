//! Keyed work dispatch: a deduplicating queue and a worker pool that
//! serializes reconciliation per resource identity.
//!
//! An identity is in at most one of three places: queued, in flight, or
//! dirty (enqueued again while its pass was running). Dirty identities
//! re-enter the queue when their pass finishes, so concurrent enqueues
//! coalesce into one follow-up pass instead of stacking.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;

use steward_core::identity::ResourceIdentity;

use crate::reconcile::Reconciler;

#[derive(Default)]
struct QueueInner {
    order: VecDeque<ResourceIdentity>,
    queued: HashSet<ResourceIdentity>,
    in_flight: HashSet<ResourceIdentity>,
    dirty: HashSet<ResourceIdentity>,
}

/// Deduplicating FIFO keyed by resource identity.
///
/// `next` never hands out an identity that is already being worked on;
/// callers must pair every `next` with a `finish`.
#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity. A duplicate of a queued identity is dropped; a
    /// duplicate of an in-flight one is parked and re-queued on `finish`.
    pub async fn enqueue(&self, id: ResourceIdentity) {
        let mut inner = self.inner.lock().await;
        if inner.in_flight.contains(&id) {
            inner.dirty.insert(id);
            return;
        }
        if inner.queued.insert(id.clone()) {
            inner.order.push_back(id);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Wait for the next identity and mark it in flight.
    pub async fn next(&self) -> ResourceIdentity {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(id) = inner.order.pop_front() {
                    inner.queued.remove(&id);
                    inner.in_flight.insert(id.clone());
                    // A stored notification wakes one waiter at most; pass
                    // it along while work remains.
                    if !inner.order.is_empty() {
                        self.notify.notify_one();
                    }
                    return id;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a pass finished and re-queue the identity if it went dirty
    /// while in flight.
    pub async fn finish(&self, id: &ResourceIdentity) {
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(id);
        if inner.dirty.remove(id) && inner.queued.insert(id.clone()) {
            inner.order.push_back(id.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Number of identities waiting (not counting in-flight ones).
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.order.len()
    }
}

/// Worker pool wiring: spawns `worker_count` consumers over one shared
/// queue and one reconciler.
pub struct Dispatcher;

impl Dispatcher {
    pub fn start(reconciler: Arc<Reconciler>) -> DispatcherHandle {
        let queue = Arc::new(WorkQueue::new());
        let worker_count = reconciler.config().worker_count.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut workers = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let queue = Arc::clone(&queue);
            let reconciler = Arc::clone(&reconciler);
            let shutdown = shutdown_rx.clone();
            workers.push(tokio::spawn(worker_loop(
                worker, queue, reconciler, shutdown,
            )));
        }
        tracing::info!(worker_count, "dispatcher started");

        DispatcherHandle {
            queue,
            shutdown_tx,
            workers,
        }
    }
}

/// Running dispatcher: the enqueue surface plus shutdown.
pub struct DispatcherHandle {
    queue: Arc<WorkQueue>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub async fn enqueue(&self, id: ResourceIdentity) {
        self.queue.enqueue(id).await;
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Stop accepting work and wait for in-flight passes to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "worker task aborted");
            }
        }
        tracing::info!("dispatcher stopped");
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let id = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            id = queue.next() => id,
        };

        tracing::debug!(worker, identity = %id, "reconciling");
        let outcome = reconciler.reconcile(&id).await;
        queue.finish(&id).await;

        match outcome {
            Ok(outcome) => {
                if let Some(delay) = outcome.requeue_after {
                    schedule(&queue, id, delay);
                }
            }
            Err(err) => {
                let delay = reconciler.retry_delay(&id);
                tracing::warn!(
                    worker,
                    identity = %id,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "reconcile pass errored, retrying"
                );
                schedule(&queue, id, delay);
            }
        }
    }
    tracing::debug!(worker, "worker stopped");
}

/// Re-enqueue after a delay without holding a worker.
fn schedule(queue: &Arc<WorkQueue>, id: ResourceIdentity, delay: Duration) {
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        queue.enqueue(id).await;
    });
}
