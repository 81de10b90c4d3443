//! steward-store
//!
//! The declarative-store boundary: the `ManifestStore` port the engine
//! reconciles against, plus an in-memory reference backend with
//! optimistic-concurrency write-back and a change-notification channel.

pub mod error;
pub mod memory;
pub mod store;

pub use crate::error::StoreError;
pub use crate::memory::MemoryStore;
pub use crate::store::{BoxFuture, CommitOutcome, ManifestStore};
