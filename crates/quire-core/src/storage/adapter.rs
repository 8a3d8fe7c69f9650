//! PersistenceAdapter Storage Abstraction
//!
//! The engine never talks to durable storage directly. It consumes a
//! [`PersistenceAdapter`], a narrow create/read/update/delete/list interface
//! keyed by node id. Implementations may wrap an HTTP backend, a database, or
//! the in-memory [`MockPersistence`](crate::test_support::MockPersistence).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::{Checksum, FileNode, NodeId, NodeKind};
use crate::storage::StorageResult;

/// Node metadata as reported by storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub parent_id: Option<NodeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub references: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

impl StoredNode {
    /// Create a record with minimal required fields
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, kind: NodeKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            parent_id: None,
            created_at: now,
            updated_at: now,
            references: Vec::new(),
            checksum: None,
        }
    }

    /// Builder-style: set the parent folder
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Builder-style: set outbound references
    #[must_use]
    pub fn with_references(mut self, references: Vec<NodeId>) -> Self {
        self.references = references;
        self
    }

    /// Builder-style: set the content digest
    #[must_use]
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Metadata of an in-memory node, as sent on first create
    pub fn from_node(node: &FileNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            kind: node.kind,
            parent_id: node.parent_id.clone(),
            created_at: node.created_at,
            updated_at: node.updated_at,
            references: node.references.iter().cloned().collect(),
            checksum: node.checksum.clone(),
        }
    }
}

/// Partial update sent to storage; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredPatch {
    pub name: Option<String>,
    /// `Some(None)` moves the node to the root
    pub parent_id: Option<Option<NodeId>>,
    pub content: Option<String>,
    pub references: Option<Vec<NodeId>>,
}

impl StoredPatch {
    /// Full metadata (and resident content) of a node
    pub fn from_node(node: &FileNode) -> Self {
        Self {
            name: Some(node.name.clone()),
            parent_id: Some(node.parent_id.clone()),
            content: node.content.clone(),
            references: Some(node.references.iter().cloned().collect()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.parent_id.is_none()
            && self.content.is_none()
            && self.references.is_none()
    }
}

/// Durable storage consumed by the engine
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the autosave task calls into the
/// adapter from a spawned tokio task.
///
/// # Error Handling
///
/// Missing records are reported as [`StorageError::NotFound`](crate::storage::StorageError::NotFound).
/// Transient failures should use the retryable variants so autosave retries them.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Create the durable counterpart of a node
    async fn create(&self, node: &StoredNode, content: &str) -> StorageResult<StoredNode>;

    /// Read the content of a file
    async fn read(&self, id: &NodeId) -> StorageResult<String>;

    /// Apply a partial update
    async fn update(&self, id: &NodeId, patch: StoredPatch) -> StorageResult<StoredNode>;

    /// Delete the durable counterpart
    async fn delete(&self, id: &NodeId) -> StorageResult<()>;

    /// List metadata of every stored node
    async fn list(&self) -> StorageResult<Vec<StoredNode>>;
}

/// Blanket implementation of PersistenceAdapter for Arc<T>
#[async_trait]
impl<T: PersistenceAdapter + ?Sized> PersistenceAdapter for std::sync::Arc<T> {
    async fn create(&self, node: &StoredNode, content: &str) -> StorageResult<StoredNode> {
        (**self).create(node, content).await
    }

    async fn read(&self, id: &NodeId) -> StorageResult<String> {
        (**self).read(id).await
    }

    async fn update(&self, id: &NodeId, patch: StoredPatch) -> StorageResult<StoredNode> {
        (**self).update(id, patch).await
    }

    async fn delete(&self, id: &NodeId) -> StorageResult<()> {
        (**self).delete(id).await
    }

    async fn list(&self) -> StorageResult<Vec<StoredNode>> {
        (**self).list().await
    }
}
