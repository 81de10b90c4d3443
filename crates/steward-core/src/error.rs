use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid permission flag {flag:?} in {value:?} (expected letters from \"CUD\")")]
    InvalidPermission { value: String, flag: char },
}
