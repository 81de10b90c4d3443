use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Store(#[from] steward_store::error::StoreError),

    #[error("duplicate manager registered for kind {0:?}")]
    DuplicateManager(String),
}
