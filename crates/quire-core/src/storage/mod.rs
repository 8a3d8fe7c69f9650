//! Persistence boundary.
//!
//! - [`PersistenceAdapter`]: the create/read/update/delete/list trait the engine consumes
//! - [`StoredNode`] / [`StoredPatch`]: the records exchanged with it
//! - [`StorageError`]: failures, classified as retryable or not

pub mod adapter;
pub mod error;

pub use adapter::{PersistenceAdapter, StoredNode, StoredPatch};
pub use error::{StorageError, StorageResult};
