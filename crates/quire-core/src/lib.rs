//! # Quire Core
//!
//! In-memory file lifecycle engine for a document editor: it tracks every
//! file and folder, tells unsaved documents apart from persisted ones,
//! autosaves dirty content, keeps a reference graph between files and
//! publishes a typed event for every transition.
//!
//! The entry point is [`Workspace`]. Durable storage is consumed through
//! [`PersistenceAdapter`].

pub mod autosave;
pub mod error;
pub mod events;
pub mod graph;
pub mod node;
pub mod open_files;
pub mod registry;
pub mod storage;
pub mod test_support;
pub mod tracing_utils;
pub mod workspace;

pub use autosave::{AutosaveHandle, AutosaveState, TickOutcome, TickReport};
pub use error::{FileError, FileResult};
pub use events::{EventSubscriber, FileEvent, FileEventKind, SubscriptionId};
pub use graph::{BrokenReason, BrokenReference, Reference, ReferenceStatus};
pub use node::{
    Checksum, FileNode, FileSnapshot, NodeId, NodeKind, PersistedFile, PersistedSnapshot,
    SaveState, TrackedFile, TransientFile,
};
pub use storage::{PersistenceAdapter, StorageError, StorageResult, StoredNode, StoredPatch};
pub use workspace::{CreateFileSpec, FilePatch, Workspace, WorkspaceBuilder};

// Configuration types consumed by `Workspace::builder`
pub use quire_config::{AutosaveConfig, QuireConfig};
