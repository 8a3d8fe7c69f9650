//! In-memory operations: create, edit, move, rename, references, open files.

use std::collections::BTreeSet;

use tokio::time::Instant;
use tracing::debug;

use super::{ensure_file, CreateFileSpec, FilePatch, Workspace, WorkspaceInner, WorkspaceState};
use crate::error::{FileError, FileResult};
use crate::events::{FileEvent, FileEventKind};
use crate::graph::Reference;
use crate::node::{FileNode, FileSnapshot, NodeId, NodeKind, TrackedFile, TransientFile};

const DEFAULT_FILE_NAME: &str = "Untitled";
const DEFAULT_FOLDER_NAME: &str = "New Folder";

impl Workspace {
    /// Insert a new transient node.
    pub fn create_file(&self, spec: CreateFileSpec) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        if state.registry.contains(&spec.id) {
            return Err(FileError::DuplicateId(spec.id));
        }
        if state.saving.contains(&spec.id) {
            return Err(FileError::SaveInProgress(spec.id));
        }
        state.registry.validate_parent(spec.parent_id.as_ref())?;
        reject_self_reference(&spec.id, &spec.references)?;

        let id = spec.id.clone();
        let mut node = FileNode::new(spec.id, spec.name, spec.kind, spec.parent_id);
        if let (NodeKind::File, Some(content)) = (spec.kind, spec.content) {
            node.set_content(content);
        }
        self.inner.insert_transient(&mut state, node, spec.references)?;
        debug!(%id, kind = ?spec.kind, "Node created");
        state.snapshot(&id)
    }

    /// New blank document with a fresh id and a default name.
    pub fn create_temp_file(&self, parent_id: Option<&str>) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let parent = parent_id.map(NodeId::from);
        state.registry.validate_parent(parent.as_ref())?;

        let id = state.registry.allocate_id();
        let name = state.registry.unique_name(parent_id, DEFAULT_FILE_NAME);
        let node = FileNode::new(id.clone(), name, NodeKind::File, parent);
        self.inner.insert_transient(&mut state, node, BTreeSet::new())?;
        debug!(%id, "Temp file created");
        state.snapshot(&id)
    }

    /// New transient folder. An empty name picks a default unique among siblings.
    pub fn create_directory(&self, parent_id: Option<&str>, name: &str) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let parent = parent_id.map(NodeId::from);
        state.registry.validate_parent(parent.as_ref())?;

        let id = state.registry.allocate_id();
        let name = if name.trim().is_empty() {
            state.registry.unique_name(parent_id, DEFAULT_FOLDER_NAME)
        } else {
            name.to_string()
        };
        let node = FileNode::new(id.clone(), name, NodeKind::Folder, parent);
        self.inner.insert_transient(&mut state, node, BTreeSet::new())?;
        debug!(%id, "Folder created");
        state.snapshot(&id)
    }

    /// Merge the non-id fields of `patch` into an existing node.
    pub fn update_file(&self, patch: FilePatch) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let id = patch.id.clone();
        let file = state.registry.require(&id)?;

        if patch.content.is_some() {
            ensure_file(file)?;
        }
        if let Some(parent) = &patch.parent_id {
            if file.node().parent_id != *parent {
                state.registry.validate_move(&id, parent.as_ref())?;
            }
        }
        if let Some(refs) = &patch.references {
            reject_self_reference(&id, refs)?;
        }

        let file = state.registry.require_mut(&id)?;
        let node = file.node_mut();
        if let Some(name) = patch.name {
            node.name = name;
        }
        if let Some(parent) = patch.parent_id {
            node.parent_id = parent;
        }
        let content_changed = patch
            .content
            .map(|content| node.set_content(content))
            .unwrap_or(false);
        node.touch();

        if let Some(refs) = patch.references {
            state.set_references(&id, refs)?;
        }
        self.inner.sync_unsaved(&mut state, &id);

        let snapshot = state.snapshot(&id)?;
        let content = content_changed
            .then(|| snapshot.node().content.clone())
            .flatten();
        self.inner
            .emit(FileEvent::new(FileEventKind::Updated, snapshot.clone()).with_content(content));
        Ok(snapshot)
    }

    /// Apply an editor change in memory. Emits nothing when neither the
    /// content nor the references changed.
    pub fn update_file_content(
        &self,
        id: &str,
        content: String,
        references: Option<BTreeSet<NodeId>>,
    ) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let file = state.registry.require(id)?;
        ensure_file(file)?;
        let node_id = file.id().clone();
        if let Some(refs) = &references {
            reject_self_reference(&node_id, refs)?;
        }

        let refs_changed = match references {
            Some(refs) => state.set_references(id, refs)?,
            None => false,
        };
        let file = state.registry.require_mut(id)?;
        let content_changed = file.node_mut().set_content(content);
        if !content_changed && !refs_changed {
            return Ok(file.clone());
        }

        file.node_mut().touch();
        self.inner.sync_unsaved(&mut state, &node_id);

        let snapshot = state.snapshot(id)?;
        let content = snapshot.node().content.clone();
        self.inner
            .emit(FileEvent::new(FileEventKind::Updated, snapshot.clone()).with_content(content));
        Ok(snapshot)
    }

    /// Revert in-memory edits to the last persisted state, or to the empty
    /// document for a transient file.
    ///
    /// A saved parent that is no longer a valid folder is not restored.
    pub fn discard_changes(&self, id: &str) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let file = state.registry.require(id)?;
        ensure_file(file)?;
        let saved = file.snapshot().cloned();

        match saved {
            Some(saved) => {
                let restore_parent = state
                    .registry
                    .validate_move(id, saved.parent_id.as_ref())
                    .is_ok();
                state.set_references(id, saved.references)?;
                let node = state.registry.require_mut(id)?.node_mut();
                node.content = saved.content;
                node.checksum = saved.checksum;
                node.name = saved.name;
                if restore_parent {
                    node.parent_id = saved.parent_id;
                } else {
                    debug!(id, "Saved parent is gone, keeping the current one");
                }
            }
            None => {
                state.registry.require_mut(id)?.node_mut().set_content(String::new());
            }
        }
        state.registry.require_mut(id)?.node_mut().touch();
        state.autosave.unregister(id);
        self.inner.sync_unsaved(&mut state, id);
        debug!(id, "Changes discarded");

        let snapshot = state.snapshot(id)?;
        let content = snapshot.node().content.clone();
        self.inner
            .emit(FileEvent::new(FileEventKind::Updated, snapshot.clone()).with_content(content));
        Ok(snapshot)
    }

    /// Re-parent a node. `previous_id` of the event is the former parent.
    pub fn move_file(&self, id: &str, new_parent: Option<&str>) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let new_parent = new_parent.map(NodeId::from);
        let previous = state.registry.require(id)?.node().parent_id.clone();
        if previous == new_parent {
            return state.snapshot(id);
        }
        state.registry.validate_move(id, new_parent.as_ref())?;

        let node = state.registry.require_mut(id)?.node_mut();
        node.parent_id = new_parent;
        node.touch();
        self.inner.sync_unsaved(&mut state, id);

        let snapshot = state.snapshot(id)?;
        self.inner.emit(FileEvent::moved(snapshot.clone(), previous));
        Ok(snapshot)
    }

    /// Change the display name. Written with the next save; until then the
    /// node has unsaved metadata.
    pub fn rename_file(&self, id: &str, new_name: &str) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let file = state.registry.require_mut(id)?;
        if new_name.is_empty() || file.node().name == new_name {
            return Ok(file.clone());
        }
        let node = file.node_mut();
        node.name = new_name.to_string();
        node.touch();
        self.inner.sync_unsaved(&mut state, id);

        let snapshot = state.snapshot(id)?;
        self.inner
            .emit(FileEvent::renamed(snapshot.clone(), snapshot.id().clone()));
        Ok(snapshot)
    }

    /// Give a transient node a new id. Every index follows the change.
    pub fn reassign_id(&self, id: &str, new_id: impl Into<NodeId>) -> FileResult<FileSnapshot> {
        let new_id = new_id.into();
        let mut state = self.inner.state.lock();
        let file = state.registry.require(id)?;
        if file.is_persisted() {
            return Err(FileError::AlreadyPersisted(file.id().clone()));
        }
        if new_id.as_str() == id {
            return Ok(file.clone());
        }
        if state.saving.contains(id) {
            return Err(FileError::SaveInProgress(file.id().clone()));
        }
        if state.registry.contains(&new_id) {
            return Err(FileError::DuplicateId(new_id));
        }
        if state.saving.contains(&new_id) {
            return Err(FileError::SaveInProgress(new_id));
        }

        let old_id = file.id().clone();
        state.registry.rekey(id, &new_id)?;
        state.graph.rekey(id, &new_id);
        let sources = state.graph.backlinks(&new_id);
        for source in &sources {
            if let Some(file) = state.registry.get_mut(source) {
                let refs = &mut file.node_mut().references;
                if refs.remove(&old_id) {
                    refs.insert(new_id.clone());
                }
            }
        }
        // Persisted sources now hold a reference storage has not seen
        for source in &sources {
            self.inner.sync_unsaved(&mut state, source);
        }
        if let Some(file) = state.registry.get_mut(&new_id) {
            file.node_mut().references.remove(&new_id);
        }
        state.open_files.rekey(id, &new_id);
        state.autosave.rekey(id, &new_id);
        {
            let mut locks = self.inner.save_locks.lock();
            if let Some(lock) = locks.remove(id) {
                locks.insert(new_id.clone(), lock);
            }
        }
        debug!(from = %old_id, to = %new_id, "Id reassigned");

        let snapshot = state.snapshot(&new_id)?;
        self.inner.emit(FileEvent::renamed(snapshot.clone(), old_id));
        Ok(snapshot)
    }

    /// Replace the outbound references of `id`; emits `Updated` only when
    /// something changed.
    pub fn update_file_references(
        &self,
        id: &str,
        references: BTreeSet<NodeId>,
    ) -> FileResult<Vec<Reference>> {
        let mut state = self.inner.state.lock();
        state.registry.require(id)?;
        if state.set_references(id, references)? {
            self.inner.sync_unsaved(&mut state, id);
            let snapshot = state.snapshot(id)?;
            self.inner
                .emit(FileEvent::new(FileEventKind::Updated, snapshot));
        }
        Ok(state.graph.references(id))
    }

    pub fn get_file_references(&self, id: &str) -> FileResult<Vec<Reference>> {
        let state = self.inner.state.lock();
        state.registry.require(id)?;
        Ok(state.graph.references(id))
    }

    /// Sources referencing `id`, including for deleted ids
    pub fn get_backlinks(&self, id: &str) -> Vec<NodeId> {
        self.inner.state.lock().graph.backlinks(id)
    }

    /// Open `id` if needed and make it the current editing file.
    pub fn select_file(&self, id: &str) -> FileResult<FileSnapshot> {
        let mut state = self.inner.state.lock();
        let snapshot = state.snapshot(id)?;
        let outcome = state.open_files.select(snapshot.id());
        if snapshot.has_unsaved_changes()
            && state.autosave.ensure_tracked(snapshot.id(), Instant::now())
        {
            debug!(id, "Unsaved node re-armed for autosave");
        }
        if outcome.opened {
            self.inner
                .emit(FileEvent::new(FileEventKind::Opened, snapshot.clone()));
        }
        if outcome.selected {
            self.inner
                .emit(FileEvent::new(FileEventKind::Selected, snapshot.clone()));
        }
        Ok(snapshot)
    }

    /// Close `id`; returns false when it was not open. Unsaved changes are
    /// kept but not autosaved until the node is selected or edited again.
    pub fn close_file(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(outcome) = state.open_files.close(id) else {
            return false;
        };
        state.autosave.unregister(id);
        debug!(id, new_current = ?outcome.new_current, "File closed");
        if let Ok(snapshot) = state.snapshot(id) {
            self.inner.emit(FileEvent::new(FileEventKind::Closed, snapshot));
        }
        true
    }

    pub fn set_current_editing_file(&self, id: Option<&str>) -> FileResult<()> {
        self.inner.state.lock().open_files.set_current(id)
    }
}

impl WorkspaceInner {
    /// Insert a fresh node, record its references and emit `Created`.
    fn insert_transient(
        &self,
        state: &mut WorkspaceState,
        node: FileNode,
        references: BTreeSet<NodeId>,
    ) -> FileResult<()> {
        let id = node.id.clone();
        state.registry.insert(TrackedFile::from(TransientFile::new(node)))?;
        state.set_references(&id, references)?;
        self.sync_unsaved(state, &id);

        let snapshot = state.snapshot(&id)?;
        let content = snapshot.node().content.clone();
        self.emit(FileEvent::new(FileEventKind::Created, snapshot).with_content(content));
        Ok(())
    }

    /// Recompute the unsaved flags of `id` after an edit and keep the
    /// scheduler in step.
    pub(super) fn sync_unsaved(&self, state: &mut WorkspaceState, id: &str) {
        let Some(file) = state.registry.get_mut(id) else {
            return;
        };
        file.refresh_dirty();
        if file.has_unsaved_changes() {
            let id = file.id().clone();
            state.autosave.mark_dirty(&id, Instant::now());
        } else {
            state.autosave.mark_clean(id);
        }
    }
}

fn reject_self_reference(id: &NodeId, refs: &BTreeSet<NodeId>) -> FileResult<()> {
    if refs.contains(id) {
        return Err(FileError::InvalidReference {
            source_id: id.clone(),
            target: id.clone(),
        });
    }
    Ok(())
}
