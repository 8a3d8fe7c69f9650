//! Authoritative in-memory index of nodes.
//!
//! The registry owns every [`TrackedFile`] and enforces the structural
//! invariants: unique ids, parents that are existing folders, and an acyclic
//! parent relation. It knows nothing about events, references or storage.

use std::collections::{BTreeMap, HashSet};

use crate::error::{FileError, FileResult};
use crate::node::{NodeId, PersistedSnapshot, TrackedFile};

#[derive(Debug, Default)]
pub struct FileRegistry {
    files: BTreeMap<NodeId, TrackedFile>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.files.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TrackedFile> {
        self.files.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut TrackedFile> {
        self.files.get_mut(id)
    }

    pub(crate) fn require(&self, id: &str) -> FileResult<&TrackedFile> {
        self.files.get(id).ok_or_else(|| FileError::not_found(id))
    }

    pub(crate) fn require_mut(&mut self, id: &str) -> FileResult<&mut TrackedFile> {
        self.files.get_mut(id).ok_or_else(|| FileError::not_found(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedFile> {
        self.files.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.files.keys()
    }

    pub fn is_folder(&self, id: &str) -> bool {
        self.files.get(id).is_some_and(|f| f.node().is_folder())
    }

    /// True iff any node holds unsaved content or metadata
    pub fn any_unsaved(&self) -> bool {
        self.files.values().any(TrackedFile::has_unsaved_changes)
    }

    pub fn unsaved_ids(&self) -> Vec<NodeId> {
        self.files
            .values()
            .filter(|f| f.has_unsaved_changes())
            .map(|f| f.id().clone())
            .collect()
    }

    /// Insert a new node after validating id uniqueness and its parent.
    pub(crate) fn insert(&mut self, file: TrackedFile) -> FileResult<()> {
        let id = file.id().clone();
        if self.files.contains_key(&id) {
            return Err(FileError::DuplicateId(id));
        }
        self.validate_parent(file.node().parent_id.as_ref())?;
        self.files.insert(id, file);
        Ok(())
    }

    /// Insert without parent validation; used while reconciling a storage
    /// listing whose parents may arrive later. Call [`Self::repair_parents`] after.
    pub(crate) fn insert_unchecked(&mut self, file: TrackedFile) {
        self.files.insert(file.id().clone(), file);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<TrackedFile> {
        self.files.remove(id)
    }

    /// A non-null parent must be an existing folder.
    pub fn validate_parent(&self, parent: Option<&NodeId>) -> FileResult<()> {
        match parent {
            None => Ok(()),
            Some(parent) if self.is_folder(parent) => Ok(()),
            Some(parent) => Err(FileError::InvalidParent(parent.clone())),
        }
    }

    /// Validate re-parenting `id` under `new_parent`.
    pub fn validate_move(&self, id: &str, new_parent: Option<&NodeId>) -> FileResult<()> {
        self.require(id)?;
        self.validate_parent(new_parent)?;

        let Some(parent) = new_parent else {
            return Ok(());
        };

        // Walk up from the new parent; reaching `id` means a cycle.
        let mut cursor = Some(parent.clone());
        let mut seen = HashSet::new();
        while let Some(current) = cursor {
            if current.as_str() == id {
                return Err(FileError::CyclicParent {
                    id: NodeId::from(id),
                    parent: parent.clone(),
                });
            }
            if !seen.insert(current.clone()) {
                break;
            }
            cursor = self
                .files
                .get(&current)
                .and_then(|f| f.node().parent_id.clone());
        }
        Ok(())
    }

    /// Direct children of a folder, or of the root when `parent` is `None`.
    pub fn children(&self, parent: Option<&str>) -> Vec<&TrackedFile> {
        self.files
            .values()
            .filter(|f| f.node().parent_id.as_deref() == parent)
            .collect()
    }

    pub fn has_children(&self, id: &str) -> bool {
        self.files
            .values()
            .any(|f| f.node().parent_id.as_deref() == Some(id))
    }

    /// `base`, or `base N` for the first N that is free among siblings.
    pub fn unique_name(&self, parent: Option<&str>, base: &str) -> String {
        let taken: HashSet<&str> = self
            .children(parent)
            .into_iter()
            .map(|f| f.node().name.as_str())
            .collect();
        if !taken.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{} {}", base, n))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    /// Fresh id not used by any node.
    pub fn allocate_id(&self) -> NodeId {
        loop {
            let id = NodeId::temporary();
            if !self.files.contains_key(&id) {
                return id;
            }
        }
    }

    /// Record a successful write, promoting transient nodes.
    pub(crate) fn record_persisted(
        &mut self,
        id: &str,
        snapshot: PersistedSnapshot,
    ) -> Option<&mut TrackedFile> {
        let (key, file) = self.files.remove_entry(id)?;
        let file = file.into_persisted(snapshot);
        self.files.insert(key.clone(), file);
        self.files.get_mut(&key)
    }

    /// Change a node's id; children follow.
    pub(crate) fn rekey(&mut self, old: &str, new: &NodeId) -> FileResult<()> {
        if self.files.contains_key(new) {
            return Err(FileError::DuplicateId(new.clone()));
        }
        let mut file = self.files.remove(old).ok_or_else(|| FileError::not_found(old))?;
        file.node_mut().id = new.clone();
        self.files.insert(new.clone(), file);

        for child in self.files.values_mut() {
            if child.node().parent_id.as_deref() == Some(old) {
                child.node_mut().parent_id = Some(new.clone());
            }
        }
        Ok(())
    }

    /// Reattach nodes whose parent is missing, not a folder, or part of a
    /// cycle to the root. Returns the ids that were moved.
    pub(crate) fn repair_parents(&mut self) -> Vec<NodeId> {
        let mut broken = Vec::new();
        for file in self.files.values() {
            let node = file.node();
            let Some(parent) = node.parent_id.as_ref() else {
                continue;
            };
            if !self.is_folder(parent) || self.has_cycle_from(&node.id) {
                broken.push(node.id.clone());
            }
        }
        for id in &broken {
            if let Some(file) = self.files.get_mut(id) {
                file.node_mut().parent_id = None;
            }
        }
        broken
    }

    fn has_cycle_from(&self, id: &NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut cursor = Some(id.clone());
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                return true;
            }
            cursor = self
                .files
                .get(&current)
                .and_then(|f| f.node().parent_id.clone());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Checksum, FileNode, NodeKind, TransientFile};
    use chrono::Utc;

    fn folder(id: &str, parent: Option<&str>) -> TrackedFile {
        TransientFile::new(FileNode::new(
            NodeId::from(id),
            id,
            NodeKind::Folder,
            parent.map(NodeId::from),
        ))
        .into()
    }

    fn file(id: &str, parent: Option<&str>) -> TrackedFile {
        TransientFile::new(FileNode::new(
            NodeId::from(id),
            id,
            NodeKind::File,
            parent.map(NodeId::from),
        ))
        .into()
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut registry = FileRegistry::new();
        registry.insert(file("f1", None)).unwrap();
        let err = registry.insert(file("f1", None)).unwrap_err();
        assert_eq!(err, FileError::DuplicateId(NodeId::from("f1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_parent_must_be_existing_folder() {
        let mut registry = FileRegistry::new();
        registry.insert(file("f1", None)).unwrap();

        let err = registry.insert(file("f2", Some("missing"))).unwrap_err();
        assert_eq!(err, FileError::InvalidParent(NodeId::from("missing")));

        let err = registry.insert(file("f3", Some("f1"))).unwrap_err();
        assert_eq!(err, FileError::InvalidParent(NodeId::from("f1")));
    }

    #[test]
    fn test_move_into_own_subtree_is_cyclic() {
        let mut registry = FileRegistry::new();
        registry.insert(folder("a", None)).unwrap();
        registry.insert(folder("b", Some("a"))).unwrap();
        registry.insert(folder("c", Some("b"))).unwrap();

        assert!(matches!(
            registry.validate_move("a", Some(&NodeId::from("c"))),
            Err(FileError::CyclicParent { .. })
        ));
        assert!(matches!(
            registry.validate_move("a", Some(&NodeId::from("a"))),
            Err(FileError::CyclicParent { .. })
        ));
        assert!(registry.validate_move("c", None).is_ok());
    }

    #[test]
    fn test_unique_name_among_siblings() {
        let mut registry = FileRegistry::new();
        assert_eq!(registry.unique_name(None, "Untitled"), "Untitled");

        let mut first = file("t1", None);
        first.node_mut().name = "Untitled".to_string();
        registry.insert(first).unwrap();
        assert_eq!(registry.unique_name(None, "Untitled"), "Untitled 2");

        registry.insert(folder("d1", None)).unwrap();
        assert_eq!(registry.unique_name(Some("d1"), "Untitled"), "Untitled");
    }

    #[test]
    fn test_record_persisted_promotes() {
        let mut registry = FileRegistry::new();
        registry.insert(file("t1", None)).unwrap();
        let snapshot =
            PersistedSnapshot::of_node(registry.get("t1").unwrap().node(), Some(String::new()), Utc::now());
        assert_eq!(snapshot.checksum, Some(Checksum::empty()));
        let promoted = registry.record_persisted("t1", snapshot).unwrap();
        assert!(promoted.is_persisted());
        assert_eq!(promoted.id().as_str(), "t1");
    }

    #[test]
    fn test_rekey_moves_children() {
        let mut registry = FileRegistry::new();
        registry.insert(folder("d1", None)).unwrap();
        registry.insert(file("f1", Some("d1"))).unwrap();

        registry.rekey("d1", &NodeId::from("d2")).unwrap();
        assert!(!registry.contains("d1"));
        assert_eq!(
            registry.get("f1").unwrap().node().parent_id,
            Some(NodeId::from("d2"))
        );
    }

    #[test]
    fn test_repair_parents_detaches_orphans_and_cycles() {
        let mut registry = FileRegistry::new();
        registry.insert_unchecked(file("orphan", Some("gone")));
        registry.insert_unchecked(folder("x", Some("y")));
        registry.insert_unchecked(folder("y", Some("x")));

        let mut moved = registry.repair_parents();
        moved.sort();
        assert_eq!(
            moved,
            vec![NodeId::from("orphan"), NodeId::from("x"), NodeId::from("y")]
        );
        assert!(registry
            .iter()
            .all(|f| f.node().parent_id.is_none()));
    }
}
