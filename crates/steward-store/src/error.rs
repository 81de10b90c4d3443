use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("manifest not found: {identity}")]
    NotFound { identity: String },

    #[error("version conflict for {identity} (expected {expected}, stored {stored})")]
    VersionConflict {
        identity: String,
        expected: u64,
        stored: u64,
    },
}
