//! Autosave bookkeeping
//!
//! Tracks a per-node state machine and decides which nodes a tick should
//! flush. It never performs I/O itself; the workspace drives the saves and
//! reports back through [`AutosaveScheduler::finish_success`] and
//! [`AutosaveScheduler::record_failure`].
//!
//! # State Transitions
//!
//! ```text
//! Clean --edit--> Dirty --tick (debounced)--> Saving
//!                   ↑                           |
//!                   ├---- retryable failure ----┤   (retries < max)
//!                   |                           |
//!   edit resets ----┤                           ├--> Clean   (success)
//!   the counter     |                           |
//!                 Failed <-- non-retryable -----┘   or retries == max
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::node::NodeId;
use crate::storage::StorageError;

/// Autosave state of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutosaveState {
    Clean,
    Dirty,
    Saving,
    Failed,
}

#[derive(Debug, Clone)]
struct Entry {
    state: AutosaveState,
    last_edit: Instant,
    retries: u32,
    last_error: Option<StorageError>,
}

#[derive(Debug)]
pub struct AutosaveScheduler {
    entries: HashMap<NodeId, Entry>,
    debounce: Duration,
    max_retries: u32,
}

impl AutosaveScheduler {
    pub fn new(debounce: Duration, max_retries: u32) -> Self {
        Self {
            entries: HashMap::new(),
            debounce,
            max_retries: max_retries.max(1),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Record an edit. A `Failed` node becomes `Dirty` again with its retry
    /// counter reset; a node being saved keeps `Saving`.
    pub fn mark_dirty(&mut self, id: &NodeId, now: Instant) {
        let entry = self.entries.entry(id.clone()).or_insert(Entry {
            state: AutosaveState::Clean,
            last_edit: now,
            retries: 0,
            last_error: None,
        });
        entry.last_edit = now;
        match entry.state {
            AutosaveState::Saving => {}
            AutosaveState::Failed => {
                debug!(%id, "Autosave re-armed after failure");
                entry.state = AutosaveState::Dirty;
                entry.retries = 0;
                entry.last_error = None;
            }
            AutosaveState::Clean | AutosaveState::Dirty => entry.state = AutosaveState::Dirty,
        }
    }

    /// Register a node with unsaved changes that the scheduler is not
    /// tracking (for instance after it was closed). Tracked nodes keep
    /// their state, so a `Failed` node stays failed.
    pub fn ensure_tracked(&mut self, id: &NodeId, now: Instant) -> bool {
        if self.entries.contains_key(id.as_str()) {
            return false;
        }
        self.mark_dirty(id, now);
        true
    }

    /// Forget a node that no longer needs saving. In-flight entries are kept
    /// so their result still lands.
    pub fn mark_clean(&mut self, id: &str) {
        if self
            .entries
            .get(id)
            .is_some_and(|e| e.state != AutosaveState::Saving)
        {
            self.entries.remove(id);
        }
    }

    /// Drop a node unconditionally (close, delete, discard).
    pub fn unregister(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn rekey(&mut self, old: &str, new: &NodeId) {
        if let Some(entry) = self.entries.remove(old) {
            self.entries.insert(new.clone(), entry);
        }
    }

    /// Dirty nodes whose last edit is older than the debounce window
    pub fn due(&self, now: Instant) -> Vec<NodeId> {
        let mut due: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.state == AutosaveState::Dirty
                    && now.saturating_duration_since(e.last_edit) >= self.debounce
            })
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    /// `Dirty -> Saving`; false when the node is not eligible
    pub fn begin_save(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.state == AutosaveState::Dirty => {
                entry.state = AutosaveState::Saving;
                true
            }
            _ => false,
        }
    }

    /// Put a node selected by [`Self::begin_save`] back to `Dirty` without
    /// counting a failure.
    pub fn abandon_save(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.state == AutosaveState::Saving {
                entry.state = AutosaveState::Dirty;
            }
        }
    }

    /// Close out a successful write.
    ///
    /// Returns false when the node was unregistered while saving, in which
    /// case the result is not an autosave. `still_dirty` is set when the
    /// content changed again while the write was in flight.
    pub fn finish_success(&mut self, id: &str, still_dirty: bool) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if still_dirty {
            entry.state = AutosaveState::Dirty;
            entry.retries = 0;
            entry.last_error = None;
        } else {
            self.entries.remove(id);
        }
        true
    }

    /// Close out a failed write; returns the new state, or `None` when the
    /// node was unregistered while saving.
    pub fn record_failure(&mut self, id: &str, err: &StorageError) -> Option<AutosaveState> {
        let max_retries = self.max_retries;
        let entry = self.entries.get_mut(id)?;
        entry.last_error = Some(err.clone());

        if err.is_retryable() {
            entry.retries += 1;
            if entry.retries >= max_retries {
                entry.state = AutosaveState::Failed;
                warn!(
                    %id,
                    retries = entry.retries,
                    error = %err,
                    "Autosave failed, giving up until the next edit"
                );
            } else {
                entry.state = AutosaveState::Dirty;
                debug!(%id, retries = entry.retries, error = %err, "Autosave will retry");
            }
        } else {
            entry.state = AutosaveState::Failed;
            warn!(%id, error = %err, "Autosave failed with a non-retryable error");
        }
        Some(entry.state)
    }

    /// `Clean` for nodes the scheduler does not track
    pub fn state(&self, id: &str) -> AutosaveState {
        self.entries
            .get(id)
            .map_or(AutosaveState::Clean, |e| e.state)
    }

    pub fn retries(&self, id: &str) -> u32 {
        self.entries.get(id).map_or(0, |e| e.retries)
    }

    pub fn last_error(&self, id: &str) -> Option<&StorageError> {
        self.entries.get(id).and_then(|e| e.last_error.as_ref())
    }

    pub fn failed(&self) -> Vec<NodeId> {
        let mut failed: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == AutosaveState::Failed)
            .map(|(id, _)| id.clone())
            .collect();
        failed.sort();
        failed
    }
}

/// Counters for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    pub saved: usize,
    pub retrying: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running
    Skipped,
    Ran(TickReport),
}

impl TickOutcome {
    pub fn report(&self) -> Option<TickReport> {
        match self {
            Self::Skipped => None,
            Self::Ran(report) => Some(*report),
        }
    }
}

/// Owns the background autosave task; dropping it stops the task.
#[derive(Debug)]
pub struct AutosaveHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AutosaveHandle {
    pub(crate) fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Stop the timer and wait for a running tick to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
