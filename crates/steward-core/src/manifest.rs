use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::identity::ResourceIdentity;
use crate::state::LifecycleState;

/// The declarative record for one managed resource instance.
///
/// The spec is owned by whoever declares desired state and is never mutated
/// by the engine; the status is owned by the engine and never mutated by
/// anyone else. The store enforces that split at write-back time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// Desired state, opaque to the engine. Shape varies per resource kind.
    pub spec: Value,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub meta: Meta,
    /// Manifests that must reach `Succeeded` before this resource proceeds.
    #[serde(default)]
    pub dependencies: Vec<ResourceIdentity>,
}

impl Manifest {
    /// A fresh manifest carrying only desired state, ready for `apply`.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            spec,
            status: Status::default(),
            meta: Meta::default(),
            dependencies: Vec::new(),
        }
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn with_dependency(mut self, dep: ResourceIdentity) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.meta.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.annotations.insert(key.into(), value.into());
    }

    pub fn has_finalizer(&self, name: &str) -> bool {
        self.meta.finalizers.iter().any(|f| f == name)
    }

    /// Idempotent; a finalizer appears at most once.
    pub fn add_finalizer(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.has_finalizer(&name) {
            self.meta.finalizers.push(name);
        }
    }

    pub fn remove_finalizer(&mut self, name: &str) {
        self.meta.finalizers.retain(|f| f != name);
    }
}

/// Engine-owned observed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub state: LifecycleState,
    /// Human-readable explanation, set on failure or while blocked.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    /// Opaque payload round-tripped between manager calls; never inspected
    /// by the engine.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<Value>,
    /// The spec generation the engine last acted on.
    #[serde(default)]
    pub observed_generation: u64,
}

/// Store-maintained metadata plus the engine-owned annotation/finalizer
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub uid: Uuid,
    /// Increments whenever the spec changes.
    pub generation: u64,
    /// Increments on every persisted write; backs optimistic write-back.
    pub resource_version: u64,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub deletion_requested: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Default for Meta {
    fn default() -> Self {
        let now = Timestamp::now();
        Self {
            uid: Uuid::new_v4(),
            generation: 1,
            resource_version: 0,
            annotations: BTreeMap::new(),
            finalizers: Vec::new(),
            deletion_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}
