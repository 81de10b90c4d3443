use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::manager::ResourceManager;

/// Kind-keyed table of resource managers.
///
/// Populated once at process start and read-only thereafter; the reconciler
/// takes ownership when it is built.
#[derive(Default)]
pub struct ManagerRegistry {
    managers: HashMap<String, Arc<dyn ResourceManager>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager under its kind. A second manager for the same
    /// kind is a wiring bug and is rejected.
    pub fn register(&mut self, manager: Arc<dyn ResourceManager>) -> Result<(), EngineError> {
        let kind = manager.kind().to_string();
        if self.managers.contains_key(&kind) {
            return Err(EngineError::DuplicateManager(kind));
        }
        self.managers.insert(kind, manager);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ResourceManager>> {
        self.managers.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{
        ApplyOutcome, BoxFuture, DeleteResult, ManagerError, VerifyOutcome, VerifyResult,
    };
    use serde_json::Value;

    struct NullManager {
        kind: &'static str,
    }

    impl ResourceManager for NullManager {
        fn kind(&self) -> &str {
            self.kind
        }

        fn create<'a>(
            &'a self,
            _spec: &'a Value,
        ) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
            Box::pin(async { Ok(ApplyOutcome::settled()) })
        }

        fn update<'a>(
            &'a self,
            _spec: &'a Value,
        ) -> BoxFuture<'a, Result<ApplyOutcome, ManagerError>> {
            Box::pin(async { Ok(ApplyOutcome::settled()) })
        }

        fn verify<'a>(
            &'a self,
            _spec: &'a Value,
            _token: Option<&'a Value>,
        ) -> BoxFuture<'a, Result<VerifyOutcome, ManagerError>> {
            Box::pin(async { Ok(VerifyOutcome::of(VerifyResult::Ready)) })
        }

        fn delete<'a>(
            &'a self,
            _spec: &'a Value,
        ) -> BoxFuture<'a, Result<DeleteResult, ManagerError>> {
            Box::pin(async { Ok(DeleteResult::Succeeded) })
        }
    }

    /// Lookup is by the kind string the manager reports.
    #[test]
    fn register_and_lookup_by_kind() {
        let mut registry = ManagerRegistry::new();
        registry
            .register(Arc::new(NullManager { kind: "database" }))
            .unwrap();

        assert!(registry.get("database").is_some());
        assert!(registry.get("queue").is_none());
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["database"]);
    }

    /// A second manager for the same kind is rejected at registration time.
    #[test]
    fn duplicate_kind_is_rejected() {
        let mut registry = ManagerRegistry::new();
        registry
            .register(Arc::new(NullManager { kind: "database" }))
            .unwrap();

        let err = registry
            .register(Arc::new(NullManager { kind: "database" }))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateManager(kind) if kind == "database"));
    }
}
