//! The public operation surface.
//!
//! A [`Workspace`] owns the registry, the reference graph, the open file set
//! and the autosave scheduler behind one synchronous lock, plus the event bus
//! and the persistence adapter. Every operation either applies completely,
//! including its events, or returns an error with nothing changed.
//!
//! # Locking
//!
//! - `state` (`parking_lot::Mutex`) guards all in-memory mutation and is
//!   never held across an `.await`. Events are published while it is held so
//!   subscribers see them in commit order.
//! - `save_locks` maps node ids to a per-node `tokio::sync::Mutex`; explicit
//!   saves wait on it, autosave ticks skip nodes whose lock is taken.
//!
//! Lock order is `state` then `save_locks`.
//!
//! # Example
//!
//! ```rust
//! use quire_core::test_support::MockPersistence;
//! use quire_core::Workspace;
//!
//! # async fn example() -> quire_core::FileResult<()> {
//! let workspace = Workspace::new(MockPersistence::new());
//! let draft = workspace.create_temp_file(None)?;
//! workspace.update_file_content(draft.id(), "# Notes".to_string(), None)?;
//! assert!(workspace.has_unsaved_changes());
//!
//! workspace.save_file(draft.id(), None, None).await?;
//! assert!(!workspace.has_unsaved_changes());
//! # Ok(())
//! # }
//! ```

mod autosave;
mod lifecycle;
mod persist;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quire_config::QuireConfig;
use tokio::sync::watch;

use crate::autosave::{AutosaveScheduler, AutosaveState};
use crate::error::{FileError, FileResult};
use crate::events::{EventBus, EventSubscriber, FileEvent, SubscriptionId};
use crate::graph::{BrokenReference, ReferenceGraph};
use crate::node::{FileSnapshot, NodeId, NodeKind};
use crate::open_files::OpenFileManager;
use crate::registry::FileRegistry;
use crate::storage::PersistenceAdapter;

/// Input of [`Workspace::create_file`]
#[derive(Debug, Clone, PartialEq)]
pub struct CreateFileSpec {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub parent_id: Option<NodeId>,
    /// Ignored for folders
    pub content: Option<String>,
    pub references: BTreeSet<NodeId>,
}

impl CreateFileSpec {
    pub fn file(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self::new(id.into(), name.into(), NodeKind::File)
    }

    pub fn folder(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self::new(id.into(), name.into(), NodeKind::Folder)
    }

    fn new(id: NodeId, name: String, kind: NodeKind) -> Self {
        Self {
            id,
            name,
            kind,
            parent_id: None,
            content: None,
            references: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_references<I, T>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }
}

/// Input of [`Workspace::update_file`]; `None` fields are left untouched
#[derive(Debug, Clone, PartialEq)]
pub struct FilePatch {
    pub id: NodeId,
    pub name: Option<String>,
    /// `Some(None)` moves the node to the root
    pub parent_id: Option<Option<NodeId>>,
    pub content: Option<String>,
    pub references: Option<BTreeSet<NodeId>>,
}

impl FilePatch {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            parent_id: None,
            content: None,
            references: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn parent(mut self, parent_id: Option<NodeId>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn references<I, T>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.references = Some(references.into_iter().map(Into::into).collect());
        self
    }
}

/// Everything the state lock guards
#[derive(Debug)]
pub(crate) struct WorkspaceState {
    pub(crate) registry: FileRegistry,
    pub(crate) graph: ReferenceGraph,
    pub(crate) open_files: OpenFileManager,
    pub(crate) autosave: AutosaveScheduler,
    /// Nodes with a write in flight
    pub(crate) saving: HashSet<NodeId>,
}

impl WorkspaceState {
    /// Replace the outbound references of `id` in both the node and the graph.
    fn set_references(&mut self, id: &str, refs: BTreeSet<NodeId>) -> FileResult<bool> {
        let changed = self.graph.update_references(&self.registry, id, &refs)?;
        let file = self.registry.require_mut(id)?;
        let node_changed = file.node().references != refs;
        if node_changed {
            file.node_mut().references = refs;
        }
        Ok(changed || node_changed)
    }

    fn snapshot(&self, id: &str) -> FileResult<FileSnapshot> {
        self.registry.require(id).cloned()
    }
}

pub(crate) struct WorkspaceInner {
    state: Mutex<WorkspaceState>,
    events: EventBus,
    persistence: Arc<dyn PersistenceAdapter>,
    save_locks: Mutex<HashMap<NodeId, Arc<tokio::sync::Mutex<()>>>>,
    interval: watch::Sender<Option<Duration>>,
    tick_running: AtomicBool,
}

impl WorkspaceInner {
    fn emit(&self, event: FileEvent) {
        self.events.publish(event);
    }

    fn save_lock(&self, id: &NodeId) -> Arc<tokio::sync::Mutex<()>> {
        self.save_locks.lock().entry(id.clone()).or_default().clone()
    }
}

/// Builder for [`Workspace`]
pub struct WorkspaceBuilder {
    persistence: Arc<dyn PersistenceAdapter>,
    config: QuireConfig,
}

impl WorkspaceBuilder {
    #[must_use]
    pub fn config(mut self, config: &QuireConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Override the configured autosave interval; `None` disables the timer
    #[must_use]
    pub fn autosave_interval(mut self, interval: Option<Duration>) -> Self {
        match interval {
            Some(interval) => {
                self.config.autosave.enabled = true;
                self.config.autosave.interval_ms = millis(interval);
            }
            None => self.config.autosave.enabled = false,
        }
        self
    }

    /// Quiet period after the last edit before a node is due. A tick only
    /// picks up due nodes, so an edit is written within debounce plus one
    /// interval.
    #[must_use]
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.config.autosave.debounce_ms = millis(debounce);
        self
    }

    pub fn build(self) -> Workspace {
        let autosave = &self.config.autosave;
        let state = WorkspaceState {
            registry: FileRegistry::new(),
            graph: ReferenceGraph::new(),
            open_files: OpenFileManager::new(),
            autosave: AutosaveScheduler::new(autosave.debounce(), autosave.max_retries),
            saving: HashSet::new(),
        };
        let (interval, _) = watch::channel(autosave.effective_interval());

        Workspace {
            inner: Arc::new(WorkspaceInner {
                state: Mutex::new(state),
                events: EventBus::new(self.config.events.log_events),
                persistence: self.persistence,
                save_locks: Mutex::new(HashMap::new()),
                interval,
                tick_running: AtomicBool::new(false),
            }),
        }
    }
}

/// Handle to the engine; clones share state
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

impl Workspace {
    /// Workspace with default configuration
    pub fn new<P>(persistence: P) -> Self
    where
        P: PersistenceAdapter + 'static,
    {
        Self::builder(persistence).build()
    }

    pub fn builder<P>(persistence: P) -> WorkspaceBuilder
    where
        P: PersistenceAdapter + 'static,
    {
        WorkspaceBuilder {
            persistence: Arc::new(persistence),
            config: QuireConfig::default(),
        }
    }

    /// Receive every event published from now on. Events are queued for the
    /// subscriber before the operation that emits them returns; see
    /// [`EventBus::subscribe`].
    pub fn subscribe(&self) -> EventSubscriber {
        self.inner.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn get_file(&self, id: &str) -> Option<FileSnapshot> {
        self.inner.state.lock().registry.get(id).cloned()
    }

    pub fn list_files(&self) -> Vec<FileSnapshot> {
        self.inner.state.lock().registry.iter().cloned().collect()
    }

    /// Direct children of `parent`, or root nodes for `None`
    pub fn children(&self, parent: Option<&str>) -> Vec<FileSnapshot> {
        self.inner
            .state
            .lock()
            .registry
            .children(parent)
            .into_iter()
            .cloned()
            .collect()
    }

    /// True iff any node has unsaved content or metadata, or a write in flight
    pub fn has_unsaved_changes(&self) -> bool {
        let state = self.inner.state.lock();
        state.registry.any_unsaved() || !state.saving.is_empty()
    }

    pub fn open_files(&self) -> Vec<FileSnapshot> {
        let state = self.inner.state.lock();
        state
            .open_files
            .open_files()
            .iter()
            .filter_map(|id| state.registry.get(id).cloned())
            .collect()
    }

    pub fn current_editing_file(&self) -> Option<FileSnapshot> {
        let state = self.inner.state.lock();
        state
            .open_files
            .current()
            .and_then(|id| state.registry.get(id).cloned())
    }

    pub fn autosave_state(&self, id: &str) -> FileResult<AutosaveState> {
        let state = self.inner.state.lock();
        state.registry.require(id)?;
        Ok(state.autosave.state(id))
    }

    /// Nodes autosave gave up on
    pub fn failed_autosaves(&self) -> Vec<NodeId> {
        self.inner.state.lock().autosave.failed()
    }

    pub fn broken_references(&self) -> Vec<BrokenReference> {
        self.inner.state.lock().graph.broken_references()
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Workspace")
            .field("files", &state.registry.len())
            .field("open", &state.open_files.open_files().len())
            .field("saving", &state.saving.len())
            .field("events", &self.inner.events)
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn ensure_file(file: &FileSnapshot) -> FileResult<()> {
    if file.node().is_folder() {
        return Err(FileError::NotAFile(file.id().clone()));
    }
    Ok(())
}
