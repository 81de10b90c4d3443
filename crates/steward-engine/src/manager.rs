use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a create or update call landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// Accepted; the external system is still converging.
    AwaitingVerification,
    /// The external system reports the resource fully settled.
    Succeeded,
}

/// Result of a create or update, with the manager's opaque token.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub result: ApplyResult,
    /// Round-tripped into later `verify` calls, never inspected by the
    /// engine. `None` leaves the stored token untouched.
    pub token: Option<Value>,
}

impl ApplyOutcome {
    pub fn settled() -> Self {
        Self {
            result: ApplyResult::Succeeded,
            token: None,
        }
    }

    pub fn awaiting() -> Self {
        Self {
            result: ApplyResult::AwaitingVerification,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Value) -> Self {
        self.token = Some(token);
        self
    }
}

/// Verdict of a verify call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    /// The external resource does not exist.
    Missing,
    /// Still converging; check again later.
    InProgress,
    /// Matches the declared spec.
    Ready,
    /// Exists but differs in a way an update can fix.
    UpdateRequired,
    /// Exists but differs in a way only delete-then-create can fix.
    RecreateRequired,
    /// The external system is deleting it.
    Deleting,
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub result: VerifyResult,
    pub token: Option<Value>,
}

impl VerifyOutcome {
    pub fn of(result: VerifyResult) -> Self {
        Self {
            result,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Value) -> Self {
        self.token = Some(token);
        self
    }
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    /// Gone. Managers map an external not-found here, never to an error.
    Succeeded,
    /// Deletion accepted but still running; check again later.
    InProgress,
}

/// Manager failure classification. Transient errors are retried with
/// backoff and never change the lifecycle state; fatal errors settle the
/// resource as Failed.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl ManagerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One impl per resource kind, supplied by the consumer of the engine.
///
/// Contracts the engine relies on:
/// - `verify` is safely callable before any `create` (reports `Missing`)
/// - `delete` treats already-gone as `Succeeded`
/// - all four operations are idempotent; any step may be retried after a
///   crash or timeout with the same input
///
/// Methods return boxed futures for dyn compatibility.
pub trait ResourceManager: Send + Sync {
    /// The resource kind identifier this manager handles (e.g. "database").
    fn kind(&self) -> &str;

    /// Create the external resource to match the spec.
    fn create<'a>(&'a self, spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>>;

    /// Update the external resource to match the spec.
    fn update<'a>(&'a self, spec: &'a Value) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>>;

    /// Compare the external resource against the spec. The token is whatever
    /// the manager returned from earlier calls, round-tripped unmodified.
    fn verify<'a>(
        &'a self,
        spec: &'a Value,
        token: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<VerifyOutcome, ManagerError>>;

    /// Tear down the external resource.
    fn delete<'a>(&'a self, spec: &'a Value) -> BoxFuture<'a, Result<DeleteResult, ManagerError>>;
}
