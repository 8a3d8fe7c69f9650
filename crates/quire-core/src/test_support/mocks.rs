//! Mock Implementations for Testing
//!
//! [`MockPersistence`] is an in-memory [`PersistenceAdapter`] that is:
//!
//! - **Observable**: counts every call and logs the start and end of writes
//! - **Configurable**: one-shot or persistent error injection per operation
//! - **Controllable**: a write gate holds writes open so tests can act while
//!   a save is in flight
//!
//! # Examples
//!
//! ```rust
//! use quire_core::test_support::{MockOp, MockPersistence};
//! use quire_core::storage::{PersistenceAdapter, StorageError, StoredNode};
//! use quire_core::NodeKind;
//!
//! # async fn example() -> Result<(), StorageError> {
//! let storage = MockPersistence::new();
//! storage
//!     .create(&StoredNode::new("f1", "a.md", NodeKind::File), "hello")
//!     .await?;
//! assert_eq!(storage.stats().create_count, 1);
//!
//! storage.fail_next(MockOp::Read, StorageError::network("offline"));
//! assert!(storage.read(&"f1".into()).await.is_err());
//! assert_eq!(storage.read(&"f1".into()).await?, "hello");
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::node::{Checksum, NodeId, NodeKind};
use crate::storage::{PersistenceAdapter, StorageError, StorageResult, StoredNode, StoredPatch};

/// Adapter operation, for error injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Create,
    Read,
    Update,
    Delete,
    List,
}

/// Call counts, including calls that failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockPersistenceStats {
    pub create_count: usize,
    pub read_count: usize,
    pub update_count: usize,
    pub delete_count: usize,
    pub list_count: usize,
}

impl MockPersistenceStats {
    /// Create + update + delete
    pub fn write_count(&self) -> usize {
        self.create_count + self.update_count + self.delete_count
    }
}

/// Start or end of a write, in the order the mock observed them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    Begin(MockOp, NodeId),
    End(MockOp, NodeId),
}

#[derive(Debug, Default)]
struct MockPersistenceState {
    records: BTreeMap<NodeId, (StoredNode, String)>,
    stats: MockPersistenceStats,
    queued_errors: HashMap<MockOp, VecDeque<StorageError>>,
    fail_all: Option<StorageError>,
    gate: Option<Arc<Semaphore>>,
    write_log: Vec<WriteEvent>,
}

impl MockPersistenceState {
    fn take_error(&mut self, op: MockOp) -> Option<StorageError> {
        if let Some(err) = self.queued_errors.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(err);
        }
        self.fail_all.clone()
    }

    fn count(&mut self, op: MockOp) {
        let stats = &mut self.stats;
        match op {
            MockOp::Create => stats.create_count += 1,
            MockOp::Read => stats.read_count += 1,
            MockOp::Update => stats.update_count += 1,
            MockOp::Delete => stats.delete_count += 1,
            MockOp::List => stats.list_count += 1,
        }
    }
}

/// In-memory persistence for tests
///
/// Clones share state, so a test can keep one handle while the workspace
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MockPersistence {
    state: Arc<Mutex<MockPersistenceState>>,
}

impl MockPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MockPersistenceStats {
        self.state.lock().stats.clone()
    }

    /// Fail the next call of `op` with `err`; queued errors are used in order
    pub fn fail_next(&self, op: MockOp, err: StorageError) {
        self.state
            .lock()
            .queued_errors
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Fail every call with `err` until cleared with `None`
    pub fn fail_all(&self, err: Option<StorageError>) {
        self.state.lock().fail_all = err;
    }

    /// Block writes until [`Self::release_writes`]
    pub fn hold_writes(&self) {
        self.state.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let every waiting and future write proceed
    pub fn release_writes(&self) {
        if let Some(gate) = self.state.lock().gate.take() {
            gate.close();
        }
    }

    pub fn write_log(&self) -> Vec<WriteEvent> {
        self.state.lock().write_log.clone()
    }

    /// Wait until `count` writes have started
    pub async fn wait_for_writes(&self, count: usize) {
        loop {
            let started = self
                .state
                .lock()
                .write_log
                .iter()
                .filter(|e| matches!(e, WriteEvent::Begin(..)))
                .count();
            if started >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Insert a record directly, as if written by another client
    pub fn seed(&self, mut node: StoredNode, content: impl Into<String>) {
        let content = content.into();
        if node.kind == NodeKind::File && node.checksum.is_none() {
            node.checksum = Some(Checksum::of(&content));
        }
        self.state
            .lock()
            .records
            .insert(node.id.clone(), (node, content));
    }

    /// Remove a record directly, as if deleted by another client
    pub fn remove_remote(&self, id: &str) -> bool {
        self.state.lock().records.remove(id).is_some()
    }

    pub fn stored_node(&self, id: &str) -> Option<StoredNode> {
        self.state.lock().records.get(id).map(|(node, _)| node.clone())
    }

    pub fn stored_content(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .records
            .get(id)
            .map(|(_, content)| content.clone())
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Count the call, log its start and wait at the gate
    async fn begin_write(&self, op: MockOp, id: &NodeId) {
        let gate = {
            let mut state = self.state.lock();
            state.count(op);
            state.write_log.push(WriteEvent::Begin(op, id.clone()));
            state.gate.clone()
        };
        tokio::task::yield_now().await;
        if let Some(gate) = gate {
            // Closed on release; either outcome lets the write through.
            let _ = gate.acquire().await;
        }
    }

    fn end_write(state: &mut MockPersistenceState, op: MockOp, id: &NodeId) {
        state.write_log.push(WriteEvent::End(op, id.clone()));
    }
}

#[async_trait]
impl PersistenceAdapter for MockPersistence {
    async fn create(&self, node: &StoredNode, content: &str) -> StorageResult<StoredNode> {
        self.begin_write(MockOp::Create, &node.id).await;

        let mut state = self.state.lock();
        Self::end_write(&mut state, MockOp::Create, &node.id);
        if let Some(err) = state.take_error(MockOp::Create) {
            return Err(err);
        }
        if state.records.contains_key(&node.id) {
            return Err(StorageError::backend(format!("record exists: {}", node.id)));
        }

        let mut stored = node.clone();
        stored.updated_at = Utc::now();
        stored.checksum = match stored.kind {
            NodeKind::File => Some(Checksum::of(content)),
            NodeKind::Folder => None,
        };
        state
            .records
            .insert(stored.id.clone(), (stored.clone(), content.to_string()));
        Ok(stored)
    }

    async fn read(&self, id: &NodeId) -> StorageResult<String> {
        let mut state = self.state.lock();
        state.count(MockOp::Read);
        if let Some(err) = state.take_error(MockOp::Read) {
            return Err(err);
        }
        state
            .records
            .get(id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StorageError::not_found(id.as_str()))
    }

    async fn update(&self, id: &NodeId, patch: StoredPatch) -> StorageResult<StoredNode> {
        self.begin_write(MockOp::Update, id).await;

        let mut state = self.state.lock();
        Self::end_write(&mut state, MockOp::Update, id);
        if let Some(err) = state.take_error(MockOp::Update) {
            return Err(err);
        }
        let (stored, content) = state
            .records
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found(id.as_str()))?;

        if let Some(name) = patch.name {
            stored.name = name;
        }
        if let Some(parent_id) = patch.parent_id {
            stored.parent_id = parent_id;
        }
        if let Some(references) = patch.references {
            stored.references = references;
        }
        if let Some(new_content) = patch.content {
            if stored.kind == NodeKind::File {
                stored.checksum = Some(Checksum::of(&new_content));
                *content = new_content;
            }
        }
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete(&self, id: &NodeId) -> StorageResult<()> {
        self.begin_write(MockOp::Delete, id).await;

        let mut state = self.state.lock();
        Self::end_write(&mut state, MockOp::Delete, id);
        if let Some(err) = state.take_error(MockOp::Delete) {
            return Err(err);
        }
        state
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(id.as_str()))
    }

    async fn list(&self) -> StorageResult<Vec<StoredNode>> {
        let mut state = self.state.lock();
        state.count(MockOp::List);
        if let Some(err) = state.take_error(MockOp::List) {
            return Err(err);
        }
        Ok(state.records.values().map(|(node, _)| node.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_read() {
        let storage = MockPersistence::new();
        let stored = storage
            .create(&StoredNode::new("f1", "a.md", NodeKind::File), "hello")
            .await
            .unwrap();

        assert_eq!(stored.checksum, Some(Checksum::of("hello")));
        assert_eq!(storage.read(&NodeId::from("f1")).await.unwrap(), "hello");
        assert_eq!(storage.stats().create_count, 1);
        assert_eq!(storage.stats().read_count, 1);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let storage = MockPersistence::new();
        let id = NodeId::from("ghost");
        assert!(storage.read(&id).await.unwrap_err().is_not_found());
        assert!(storage.delete(&id).await.unwrap_err().is_not_found());
        assert!(storage
            .update(&id, StoredPatch::default())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let storage = MockPersistence::new();
        storage.seed(StoredNode::new("f1", "a.md", NodeKind::File), "old");

        let stored = storage
            .update(
                &NodeId::from("f1"),
                StoredPatch {
                    name: Some("b.md".to_string()),
                    content: Some("new".to_string()),
                    ..StoredPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(stored.name, "b.md");
        assert_eq!(stored.checksum, Some(Checksum::of("new")));
        assert_eq!(storage.stored_content("f1").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_error_injection() {
        let storage = MockPersistence::new();
        storage.fail_next(MockOp::List, StorageError::network("offline"));
        assert!(storage.list().await.is_err());
        assert!(storage.list().await.is_ok());

        storage.fail_all(Some(StorageError::backend("down")));
        assert!(storage.list().await.is_err());
        assert!(storage.list().await.is_err());
        storage.fail_all(None);
        assert!(storage.list().await.is_ok());
        assert_eq!(storage.stats().list_count, 5);
    }

    #[tokio::test]
    async fn test_gate_holds_writes() {
        let storage = MockPersistence::new();
        storage.hold_writes();

        let writer = {
            let storage = storage.clone();
            tokio::spawn(async move {
                storage
                    .create(&StoredNode::new("f1", "a.md", NodeKind::File), "x")
                    .await
            })
        };

        storage.wait_for_writes(1).await;
        assert_eq!(storage.record_count(), 0);

        storage.release_writes();
        writer.await.unwrap().unwrap();
        assert_eq!(
            storage.write_log(),
            vec![
                WriteEvent::Begin(MockOp::Create, NodeId::from("f1")),
                WriteEvent::End(MockOp::Create, NodeId::from("f1")),
            ]
        );
    }
}
