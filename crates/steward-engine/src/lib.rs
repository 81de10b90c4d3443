//! steward-engine
//!
//! The reconcile loop: drives externally-managed resources toward their
//! declared desired state through pluggable per-kind resource managers.
//!
//! Public API:
//! - `ResourceManager`: the per-kind CRUD contract consumers implement
//! - `ManagerRegistry`: kind-keyed manager table, built once at startup
//! - `Reconciler`: one pass of the lifecycle state machine per call
//! - `Dispatcher`: worker pool consuming a deduplicating keyed queue
//! - `EngineConfig`: timeouts, backoff curve, and resync tuning

pub mod backoff;
pub mod config;
pub mod deps;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod policy;
pub mod reconcile;
pub mod registry;

pub use crate::backoff::BackoffPolicy;
pub use crate::config::EngineConfig;
pub use crate::dispatch::{Dispatcher, DispatcherHandle, WorkQueue};
pub use crate::error::EngineError;
pub use crate::manager::{
    ApplyOutcome, ApplyResult, DeleteResult, ManagerError, ResourceManager, VerifyOutcome,
    VerifyResult,
};
pub use crate::reconcile::{ReconcileOutcome, Reconciler};
pub use crate::registry::ManagerRegistry;
