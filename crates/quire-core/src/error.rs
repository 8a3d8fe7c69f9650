//! Engine error taxonomy.

use thiserror::Error;

use crate::node::NodeId;
use crate::storage::StorageError;

/// Errors returned by registry, graph and open-file operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FileError {
    #[error("Node already exists: {0}")]
    DuplicateId(NodeId),

    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Parent is not an existing folder: {0}")]
    InvalidParent(NodeId),

    #[error("Moving {id} under {parent} would create a cycle")]
    CyclicParent { id: NodeId, parent: NodeId },

    #[error("Invalid reference from {source_id} to {target}")]
    InvalidReference { source_id: NodeId, target: NodeId },

    #[error("Node is not open: {0}")]
    NotOpen(NodeId),

    #[error("Not a file: {0}")]
    NotAFile(NodeId),

    #[error("Folder is not empty: {0}")]
    FolderNotEmpty(NodeId),

    #[error("Node already has a durable counterpart: {0}")]
    AlreadyPersisted(NodeId),

    #[error("A save is in progress for {0}")]
    SaveInProgress(NodeId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for engine operations
pub type FileResult<T> = Result<T, FileError>;

impl FileError {
    pub(crate) fn not_found(id: &str) -> Self {
        Self::NotFound(NodeId::from(id))
    }

    /// Caller/UI logic errors; never retried
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::SaveInProgress(_))
    }

    /// Check if the error wraps a transient storage failure
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}
