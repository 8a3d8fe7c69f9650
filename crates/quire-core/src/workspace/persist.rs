//! Operations that reach the persistence adapter.
//!
//! Every write goes through the same three steps:
//!
//! 1. [`WorkspaceInner::prepare_save`] (under the state lock) applies pending
//!    edits and builds the storage request
//! 2. [`WorkspaceInner::execute`] awaits the adapter with no lock held
//! 3. [`WorkspaceInner::commit`] (under the state lock) records the outcome
//!
//! A node is never prepared twice concurrently: callers hold its save lock.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{Workspace, WorkspaceInner, WorkspaceState};
use crate::autosave::AutosaveState;
use crate::error::{FileError, FileResult};
use crate::events::{FileEvent, FileEventKind};
use crate::node::{
    Checksum, FileNode, FileSnapshot, NodeId, PersistedFile, PersistedSnapshot, SaveState,
    TrackedFile,
};
use crate::storage::{StorageError, StorageResult, StoredNode, StoredPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SaveMode {
    Explicit,
    Auto,
}

#[derive(Debug)]
pub(super) enum SaveRequest {
    Create(StoredNode, String),
    Update(StoredPatch),
}

#[derive(Debug)]
pub(super) struct PreparedSave {
    pub(super) id: NodeId,
    mode: SaveMode,
    request: SaveRequest,
    /// Content written by this request, if any
    sent_content: Option<String>,
    /// Metadata written by this request; becomes the snapshot on success
    sent_name: String,
    sent_parent: Option<NodeId>,
    sent_references: BTreeSet<NodeId>,
}

#[derive(Debug)]
pub(super) enum CommitOutcome {
    Saved(FileSnapshot),
    Failed {
        error: StorageError,
        /// Scheduler state after an autosave failure
        autosave: Option<AutosaveState>,
    },
    /// The node was deleted while the write was in flight
    Dropped { created_remotely: bool },
}

impl Workspace {
    /// Write a node through the adapter: `create` for a transient node,
    /// `update` otherwise.
    ///
    /// `content` and a non-empty `new_name` are applied as an in-memory edit
    /// first. Content is ignored for folders. Concurrent saves of the same
    /// node run one after the other.
    pub async fn save_file(
        &self,
        id: &str,
        content: Option<String>,
        new_name: Option<&str>,
    ) -> FileResult<FileSnapshot> {
        let node_id = {
            let state = self.inner.state.lock();
            state.registry.require(id)?.id().clone()
        };
        let lock = self.inner.save_lock(&node_id);
        let _guard = lock.lock_owned().await;

        let prepared = self
            .inner
            .prepare_save(&node_id, content, new_name, SaveMode::Explicit)?;
        let result = self.inner.execute(&prepared).await;
        match self.inner.finish(prepared, result).await {
            CommitOutcome::Saved(snapshot) => Ok(snapshot),
            CommitOutcome::Failed { error, .. } => Err(FileError::Storage(error)),
            CommitOutcome::Dropped { .. } => Err(FileError::NotFound(node_id)),
        }
    }

    /// Delete a node, in storage first when it has a durable counterpart.
    ///
    /// Open nodes are closed and dirty content is dropped. Folders must be
    /// empty when the call starts.
    pub async fn delete_file(&self, id: &str) -> FileResult<()> {
        let (node_id, persisted) = {
            let state = self.inner.state.lock();
            let file = state.registry.require(id)?;
            if file.node().is_folder() && state.registry.has_children(id) {
                return Err(FileError::FolderNotEmpty(file.id().clone()));
            }
            (file.id().clone(), file.is_persisted())
        };

        if persisted {
            match self.inner.persistence.delete(&node_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(id, "Already deleted in storage");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut state = self.inner.state.lock();
        state.registry.require(id)?;
        // Children added while the lock was released go to the root; the
        // record may already be gone from storage.
        let orphans: Vec<NodeId> = state
            .registry
            .children(Some(id))
            .iter()
            .map(|f| f.id().clone())
            .collect();
        for child in &orphans {
            if let Some(file) = state.registry.get_mut(child) {
                let node = file.node_mut();
                node.parent_id = None;
                node.touch();
            }
            self.inner.sync_unsaved(&mut state, child);
            warn!(%child, folder = id, "Parent deleted, moved to root");
            let snapshot = state.snapshot(child)?;
            self.inner
                .emit(FileEvent::moved(snapshot, Some(node_id.clone())));
        }
        self.inner.remove_locally(&mut state, id);
        info!(id, persisted, "File deleted");
        Ok(())
    }

    /// Resident content, fetched from storage and cached on first access.
    ///
    /// Folders have no content.
    pub async fn get_file_content(&self, id: &str) -> FileResult<Option<String>> {
        let node_id = {
            let state = self.inner.state.lock();
            let file = state.registry.require(id)?;
            if file.node().is_folder() {
                return Ok(None);
            }
            if let Some(content) = &file.node().content {
                return Ok(Some(content.clone()));
            }
            file.id().clone()
        };

        let content = self.inner.persistence.read(&node_id).await?;

        let mut state = self.inner.state.lock();
        let file = state.registry.require_mut(id)?;
        // An edit may have landed while reading; it wins.
        if file.node().content.is_none() {
            let checksum = Checksum::of(&content);
            if let Some(snapshot) = file.snapshot_mut() {
                snapshot.content = Some(content.clone());
                snapshot.checksum = Some(checksum.clone());
            }
            let node = file.node_mut();
            node.content = Some(content);
            node.checksum = Some(checksum);
            file.refresh_dirty();
            debug!(id, "Content loaded");
        }
        Ok(file.node().content.clone())
    }

    /// Reconcile the registry with the storage listing.
    ///
    /// Dirty, saving and transient nodes are never clobbered or evicted.
    pub async fn refresh_files(&self) -> FileResult<Vec<FileSnapshot>> {
        let remote = self.inner.persistence.list().await?;

        let mut guard = self.inner.state.lock();
        let state: &mut WorkspaceState = &mut guard;
        let remote_ids: HashSet<&NodeId> = remote.iter().map(|n| &n.id).collect();

        let evicted = self.inner.evict_missing(state, &remote_ids);

        let mut created = Vec::new();
        let mut updated = BTreeSet::new();
        let mut applied = Vec::new();
        for stored in &remote {
            match state.registry.get_mut(&stored.id) {
                None => {
                    state.registry.insert_unchecked(imported(stored));
                    created.push(stored.id.clone());
                    applied.push(stored);
                }
                Some(file) => {
                    if file.is_transient()
                        || file.has_unsaved_changes()
                        || state.saving.contains(&stored.id)
                    {
                        debug!(id = %stored.id, "Keeping local state over storage");
                        continue;
                    }
                    if refresh_metadata(file, stored) {
                        updated.insert(stored.id.clone());
                    }
                    applied.push(stored);
                }
            }
        }

        // Edge statuses only move on explicit reference updates, so the
        // graph is touched only when the stored set differs from ours.
        for stored in applied {
            let refs: BTreeSet<NodeId> = stored
                .references
                .iter()
                .filter(|target| **target != stored.id)
                .cloned()
                .collect();
            let file = state.registry.require_mut(&stored.id)?;
            if let Some(snapshot) = file.snapshot_mut() {
                snapshot.references = refs.clone();
            }
            if file.node().references != refs && state.set_references(&stored.id, refs)? {
                updated.insert(stored.id.clone());
            }
            if let Some(file) = state.registry.get_mut(&stored.id) {
                file.refresh_dirty();
            }
        }

        // Written back with the next save
        for id in state.registry.repair_parents() {
            warn!(%id, "Parent missing or cyclic, moved to root");
            self.inner.sync_unsaved(state, &id);
            updated.insert(id);
        }

        for id in &created {
            updated.remove(id);
            let snapshot = state.snapshot(id)?;
            self.inner
                .emit(FileEvent::new(FileEventKind::Created, snapshot));
        }
        for id in &updated {
            let snapshot = state.snapshot(id)?;
            self.inner
                .emit(FileEvent::new(FileEventKind::Updated, snapshot));
        }

        info!(
            remote = remote.len(),
            created = created.len(),
            updated = updated.len(),
            evicted,
            "Files refreshed"
        );
        Ok(state.registry.iter().cloned().collect())
    }
}

impl WorkspaceInner {
    /// Apply pending edits and build the storage request for `id`.
    pub(super) fn prepare_save(
        &self,
        id: &NodeId,
        content: Option<String>,
        new_name: Option<&str>,
        mode: SaveMode,
    ) -> FileResult<PreparedSave> {
        let mut state = self.state.lock();
        if state.saving.contains(id) {
            return Err(FileError::SaveInProgress(id.clone()));
        }
        let file = state.registry.require_mut(id)?;

        let mut content_changed = false;
        let mut renamed = false;
        {
            let node = file.node_mut();
            if let Some(name) = new_name.filter(|n| !n.is_empty() && *n != node.name) {
                node.name = name.to_string();
                renamed = true;
            }
            if let (true, Some(content)) = (node.is_file(), content) {
                content_changed = node.set_content(content);
            }
            if content_changed || renamed {
                node.touch();
            }
        }
        let dirty = file.refresh_dirty();

        let node = file.node();
        let (request, sent_content) = if file.is_transient() {
            let body = node.content.clone().unwrap_or_default();
            let sent = node.is_file().then(|| body.clone());
            (SaveRequest::Create(StoredNode::from_node(node), body), sent)
        } else {
            let mut patch = StoredPatch::from_node(node);
            if !dirty {
                patch.content = None;
            }
            let sent = patch.content.clone();
            (SaveRequest::Update(patch), sent)
        };
        let sent_name = node.name.clone();
        let sent_parent = node.parent_id.clone();
        let sent_references = node.references.clone();

        if content_changed || renamed {
            self.sync_unsaved(&mut state, id);
            let snapshot = state.snapshot(id)?;
            let content = content_changed
                .then(|| snapshot.node().content.clone())
                .flatten();
            self.emit(FileEvent::new(FileEventKind::Updated, snapshot).with_content(content));
        }

        state.saving.insert(id.clone());
        debug!(%id, ?mode, "Save prepared");
        Ok(PreparedSave {
            id: id.clone(),
            mode,
            request,
            sent_content,
            sent_name,
            sent_parent,
            sent_references,
        })
    }

    pub(super) async fn execute(&self, prepared: &PreparedSave) -> StorageResult<StoredNode> {
        match &prepared.request {
            SaveRequest::Create(node, content) => self.persistence.create(node, content).await,
            SaveRequest::Update(patch) => self.persistence.update(&prepared.id, patch.clone()).await,
        }
    }

    /// Record the outcome of a write.
    pub(super) fn commit(
        &self,
        prepared: PreparedSave,
        result: StorageResult<StoredNode>,
    ) -> CommitOutcome {
        let mut state = self.state.lock();
        let id = &prepared.id;

        if !state.registry.contains(id) {
            debug!(%id, "Node deleted during save, result dropped");
            let created_remotely =
                result.is_ok() && matches!(prepared.request, SaveRequest::Create(..));
            // The id stays reserved until `finish` has removed the record
            if !created_remotely {
                state.saving.remove(id);
                self.release_save_lock(&state, id);
            }
            return CommitOutcome::Dropped { created_remotely };
        }
        state.saving.remove(id);

        let stored = match result {
            Ok(stored) => stored,
            Err(error) => {
                let autosave = match prepared.mode {
                    SaveMode::Auto => state.autosave.record_failure(id, &error),
                    SaveMode::Explicit => {
                        warn!(%id, error = %error, "Save failed");
                        None
                    }
                };
                return CommitOutcome::Failed { error, autosave };
            }
        };

        let now = Utc::now();
        let previous = state.registry.get(id).and_then(|f| f.snapshot().cloned());
        let (checksum, content) = match prepared.sent_content {
            Some(content) => (Some(Checksum::of(&content)), Some(content)),
            None => match previous {
                Some(previous) => (previous.checksum, previous.content),
                None => (None, None),
            },
        };
        let snapshot = PersistedSnapshot {
            checksum,
            content,
            name: prepared.sent_name,
            parent_id: prepared.sent_parent,
            references: prepared.sent_references,
            persisted_at: now,
        };

        let Some(file) = state.registry.record_persisted(id, snapshot) else {
            return CommitOutcome::Dropped {
                created_remotely: false,
            };
        };
        file.save_state_mut().last_saved = Some(now);
        if file.node().created_at > stored.created_at {
            file.node_mut().created_at = stored.created_at;
        }
        file.refresh_dirty();
        let still_unsaved = file.has_unsaved_changes();

        match prepared.mode {
            SaveMode::Auto => {
                if let Some(file) = state.registry.get_mut(id) {
                    file.save_state_mut().last_auto_save = Some(now);
                }
                if !state.autosave.finish_success(id, still_unsaved) {
                    debug!(%id, "Autosave finished for an unregistered node");
                }
            }
            SaveMode::Explicit if !still_unsaved => state.autosave.mark_clean(id),
            SaveMode::Explicit => {}
        }

        let snapshot = match state.snapshot(id) {
            Ok(snapshot) => snapshot,
            Err(_) => return CommitOutcome::Dropped { created_remotely: false },
        };
        info!(%id, mode = ?prepared.mode, still_unsaved, "File saved");
        self.emit(FileEvent::new(FileEventKind::Updated, snapshot.clone()));
        CommitOutcome::Saved(snapshot)
    }

    /// Commit, then remove a record created for a node deleted meanwhile.
    pub(super) async fn finish(
        &self,
        prepared: PreparedSave,
        result: StorageResult<StoredNode>,
    ) -> CommitOutcome {
        let id = prepared.id.clone();
        let outcome = self.commit(prepared, result);
        if let CommitOutcome::Dropped {
            created_remotely: true,
        } = outcome
        {
            match self.persistence.delete(&id).await {
                Ok(()) => debug!(%id, "Removed record of a deleted node"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(%id, error = %e, "Failed to remove record of a deleted node"),
            }
            let mut state = self.state.lock();
            state.saving.remove(&id);
            self.release_save_lock(&state, &id);
        }
        outcome
    }

    /// Forget the save lock of a deleted node once no write holds its id.
    fn release_save_lock(&self, state: &WorkspaceState, id: &str) {
        if !state.registry.contains(id) && !state.saving.contains(id) {
            self.save_locks.lock().remove(id);
        }
    }

    /// Remove a node from every index and emit `Closed` (if open) then
    /// `Deleted`.
    pub(super) fn remove_locally(&self, state: &mut WorkspaceState, id: &str) -> Option<FileSnapshot> {
        let file = state.registry.remove(id)?;
        state.graph.remove_node(id);
        state.autosave.unregister(id);
        self.release_save_lock(state, id);

        if state.open_files.close(id).is_some() {
            self.emit(FileEvent::new(FileEventKind::Closed, file.clone()));
        }
        self.emit(FileEvent::new(FileEventKind::Deleted, file.clone()));
        Some(file)
    }

    /// Evict clean persisted nodes that storage no longer lists, leaves first.
    /// Folders that still hold local nodes stay.
    fn evict_missing(&self, state: &mut WorkspaceState, remote: &HashSet<&NodeId>) -> usize {
        let mut candidates: Vec<NodeId> = state
            .registry
            .iter()
            .filter(|f| {
                f.is_persisted()
                    && !f.has_unsaved_changes()
                    && !state.saving.contains(f.id())
                    && !remote.contains(f.id())
            })
            .map(|f| f.id().clone())
            .collect();

        let mut evicted = 0;
        loop {
            let before = candidates.len();
            candidates.retain(|id| {
                if state.registry.has_children(id) {
                    return true;
                }
                self.remove_locally(state, id);
                evicted += 1;
                false
            });
            if candidates.len() == before {
                break;
            }
        }
        for id in &candidates {
            warn!(%id, "Missing from storage but still has local children, kept");
        }
        evicted
    }
}

/// Registry entry for a node first seen in a storage listing
fn imported(stored: &StoredNode) -> TrackedFile {
    let mut node = FileNode::new(
        stored.id.clone(),
        stored.name.clone(),
        stored.kind,
        stored.parent_id.clone(),
    );
    node.created_at = stored.created_at;
    node.updated_at = stored.updated_at;
    node.evict_content(stored.checksum.clone());

    let snapshot = PersistedSnapshot {
        checksum: stored.checksum.clone(),
        content: None,
        name: stored.name.clone(),
        parent_id: stored.parent_id.clone(),
        references: BTreeSet::new(),
        persisted_at: stored.updated_at,
    };
    PersistedFile {
        node,
        save: SaveState::default(),
        snapshot,
    }
    .into()
}

/// Refresh metadata of a clean persisted node; returns whether it changed.
fn refresh_metadata(file: &mut TrackedFile, stored: &StoredNode) -> bool {
    let mut changed = false;
    let stale_content = stored.checksum.is_some()
        && file.snapshot().and_then(|s| s.checksum.as_ref()) != stored.checksum.as_ref();

    if stale_content {
        if let Some(snapshot) = file.snapshot_mut() {
            snapshot.checksum = stored.checksum.clone();
            snapshot.content = None;
            snapshot.persisted_at = stored.updated_at;
        }
        file.node_mut().evict_content(stored.checksum.clone());
        changed = true;
    }

    let node = file.node_mut();
    if node.name != stored.name {
        node.name = stored.name.clone();
        changed = true;
    }
    if node.parent_id != stored.parent_id {
        node.parent_id = stored.parent_id.clone();
        changed = true;
    }
    if stored.updated_at > node.updated_at {
        node.updated_at = stored.updated_at;
    }
    if let Some(snapshot) = file.snapshot_mut() {
        snapshot.name = stored.name.clone();
        snapshot.parent_id = stored.parent_id.clone();
    }
    file.refresh_dirty();
    changed
}
