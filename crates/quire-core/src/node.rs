//! File and folder records tracked by the registry.
//!
//! Every tracked node shares the [`FileNode`] base record and lives in exactly
//! one lifecycle variant of [`TrackedFile`]:
//!
//! - [`TransientFile`]: exists only in memory, no durable counterpart yet
//! - [`PersistedFile`]: has a durable counterpart, described by a
//!   [`PersistedSnapshot`] of the last successful write
//!
//! A transient file turns into a persisted one through
//! [`TransientFile::promote`], once, on its first successful save.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh id for a node created in memory
    pub fn temporary() -> Self {
        Self(format!("temp-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for NodeId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Whether a node holds content or other nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// BLAKE3 content digest, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Hash document content
    pub fn of(content: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Digest of the empty document
    pub fn empty() -> Self {
        Self::of("")
    }

    /// Wrap a digest reported by storage
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared base record of every node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub parent_id: Option<NodeId>,
    /// `None` when the content is not resident (folders, or not fetched yet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ids this node links to
    #[serde(default)]
    pub references: BTreeSet<NodeId>,
    /// Digest of `content`; `None` when unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

impl FileNode {
    pub fn new(id: NodeId, name: impl Into<String>, kind: NodeKind, parent_id: Option<NodeId>) -> Self {
        let now = Utc::now();
        let (content, checksum) = match kind {
            NodeKind::File => (Some(String::new()), Some(Checksum::empty())),
            NodeKind::Folder => (None, None),
        };
        Self {
            id,
            name: name.into(),
            kind,
            parent_id,
            content,
            created_at: now,
            updated_at: now,
            references: BTreeSet::new(),
            checksum,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Replace the resident content, returning whether it changed.
    pub(crate) fn set_content(&mut self, content: String) -> bool {
        if self.content.as_deref() == Some(content.as_str()) {
            return false;
        }
        self.checksum = Some(Checksum::of(&content));
        self.content = Some(content);
        true
    }

    /// Drop resident content, keeping the known digest.
    pub(crate) fn evict_content(&mut self, checksum: Option<Checksum>) {
        self.content = None;
        self.checksum = checksum;
    }

    /// Bump `updated_at` without ever moving it backwards.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Save bookkeeping shared by both lifecycle variants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    /// Content differs from the baseline
    pub is_dirty: bool,
    /// Name, parent or references differ from what storage last acknowledged
    #[serde(default)]
    pub metadata_dirty: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub last_auto_save: Option<DateTime<Utc>>,
}

/// What storage held after the last successful write or read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    /// `None` for folders, or when storage reported no digest
    pub checksum: Option<Checksum>,
    /// `None` until the content is fetched
    pub content: Option<String>,
    pub name: String,
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub references: BTreeSet<NodeId>,
    pub persisted_at: DateTime<Utc>,
}

impl PersistedSnapshot {
    /// Metadata of `node` as acknowledged by storage, with the given content
    pub fn of_node(node: &FileNode, content: Option<String>, persisted_at: DateTime<Utc>) -> Self {
        Self {
            checksum: content.as_deref().map(Checksum::of),
            content,
            name: node.name.clone(),
            parent_id: node.parent_id.clone(),
            references: node.references.clone(),
            persisted_at,
        }
    }

    fn metadata_matches(&self, node: &FileNode) -> bool {
        self.name == node.name
            && self.parent_id == node.parent_id
            && self.references == node.references
    }
}

/// A node that exists only in memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientFile {
    #[serde(flatten)]
    pub node: FileNode,
    pub save: SaveState,
}

impl TransientFile {
    pub fn new(node: FileNode) -> Self {
        Self {
            node,
            save: SaveState::default(),
        }
    }

    /// The single transition from in-memory to persisted. The id is preserved.
    pub fn promote(self, snapshot: PersistedSnapshot) -> PersistedFile {
        PersistedFile {
            node: self.node,
            save: self.save,
            snapshot,
        }
    }
}

/// A node with a durable counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFile {
    #[serde(flatten)]
    pub node: FileNode,
    pub save: SaveState,
    pub snapshot: PersistedSnapshot,
}

/// A registry entry: one node in exactly one lifecycle variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lifecycle", rename_all = "snake_case")]
pub enum TrackedFile {
    Transient(TransientFile),
    Persisted(PersistedFile),
}

/// Point-in-time copy of a node carried by events and accessors
pub type FileSnapshot = TrackedFile;

impl TrackedFile {
    pub fn node(&self) -> &FileNode {
        match self {
            Self::Transient(f) => &f.node,
            Self::Persisted(f) => &f.node,
        }
    }

    pub(crate) fn node_mut(&mut self) -> &mut FileNode {
        match self {
            Self::Transient(f) => &mut f.node,
            Self::Persisted(f) => &mut f.node,
        }
    }

    pub fn save_state(&self) -> &SaveState {
        match self {
            Self::Transient(f) => &f.save,
            Self::Persisted(f) => &f.save,
        }
    }

    pub(crate) fn save_state_mut(&mut self) -> &mut SaveState {
        match self {
            Self::Transient(f) => &mut f.save,
            Self::Persisted(f) => &mut f.save,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.node().id
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }

    pub fn is_dirty(&self) -> bool {
        self.save_state().is_dirty
    }

    /// Dirty content or metadata not yet written. Transient files only
    /// count their content.
    pub fn has_unsaved_changes(&self) -> bool {
        let save = self.save_state();
        save.is_dirty || save.metadata_dirty
    }

    pub fn snapshot(&self) -> Option<&PersistedSnapshot> {
        match self {
            Self::Transient(_) => None,
            Self::Persisted(f) => Some(&f.snapshot),
        }
    }

    pub(crate) fn snapshot_mut(&mut self) -> Option<&mut PersistedSnapshot> {
        match self {
            Self::Transient(_) => None,
            Self::Persisted(f) => Some(&mut f.snapshot),
        }
    }

    /// Digest the in-memory content is compared against.
    ///
    /// Transient files compare against the empty document; persisted files
    /// against their snapshot.
    pub fn baseline_checksum(&self) -> Option<Checksum> {
        match self {
            Self::Transient(_) => Some(Checksum::empty()),
            Self::Persisted(f) => f.snapshot.checksum.clone(),
        }
    }

    /// Recompute `is_dirty` from the content digest and `metadata_dirty`
    /// from the snapshot. Returns `is_dirty`.
    pub(crate) fn refresh_dirty(&mut self) -> bool {
        let dirty = {
            let node = self.node();
            match (&node.kind, &node.content) {
                (NodeKind::Folder, _) | (_, None) => false,
                (NodeKind::File, Some(content)) => {
                    self.baseline_checksum().as_ref() != Some(&Checksum::of(content))
                }
            }
        };
        let metadata_dirty = self
            .snapshot()
            .is_some_and(|s| !s.metadata_matches(self.node()));
        let save = self.save_state_mut();
        save.is_dirty = dirty;
        save.metadata_dirty = metadata_dirty;
        dirty
    }

    /// Record a successful write, promoting a transient file if needed.
    pub(crate) fn into_persisted(self, snapshot: PersistedSnapshot) -> Self {
        match self {
            Self::Transient(f) => Self::Persisted(f.promote(snapshot)),
            Self::Persisted(mut f) => {
                f.snapshot = snapshot;
                Self::Persisted(f)
            }
        }
    }
}

impl From<TransientFile> for TrackedFile {
    fn from(file: TransientFile) -> Self {
        Self::Transient(file)
    }
}

impl From<PersistedFile> for TrackedFile {
    fn from(file: PersistedFile) -> Self {
        Self::Persisted(file)
    }
}
