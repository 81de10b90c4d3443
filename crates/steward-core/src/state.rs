use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one managed resource. Exactly one state holds at any time,
/// and only the engine writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Declared but not yet acted on; dependency and permission gates run here.
    #[default]
    Pending,
    /// A create was (or is about to be) issued against the external system.
    Creating,
    /// An update was (or is about to be) issued against the external system.
    Updating,
    /// Waiting for the external system to report the resource settled.
    Verifying,
    /// Delete-then-create cycle for changes the external system cannot apply
    /// in place.
    Recreating,
    /// Converged; the external resource matches the declared spec.
    Succeeded,
    /// Terminal failure; only a spec change revives the resource.
    Failed,
    /// Deletion in progress; the finalizer holds the manifest until external
    /// cleanup completes.
    Terminating,
}

impl LifecycleState {
    /// Only a spec change moves the resource out of a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Settled states carry no pending work; the engine schedules nothing
    /// for them beyond an optional periodic resync.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Updating => "updating",
            Self::Verifying => "verifying",
            Self::Recreating => "recreating",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Terminating => "terminating",
        };
        f.write_str(name)
    }
}
