//! Ordered set of open files plus the single current editing file.

use crate::error::{FileError, FileResult};
use crate::node::NodeId;

/// What [`OpenFileManager::select`] changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectOutcome {
    pub opened: bool,
    pub selected: bool,
}

/// What [`OpenFileManager::close`] changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub was_current: bool,
    pub new_current: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct OpenFileManager {
    /// Tab order, oldest first
    open: Vec<NodeId>,
    current: Option<NodeId>,
}

impl OpenFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open.iter().any(|open| open.as_str() == id)
    }

    pub fn open_files(&self) -> &[NodeId] {
        &self.open
    }

    pub fn current(&self) -> Option<&NodeId> {
        self.current.as_ref()
    }

    /// Open `id` if needed and make it current.
    pub fn select(&mut self, id: &NodeId) -> SelectOutcome {
        let mut outcome = SelectOutcome::default();
        if !self.is_open(id) {
            self.open.push(id.clone());
            outcome.opened = true;
        }
        if self.current.as_ref() != Some(id) {
            self.current = Some(id.clone());
            outcome.selected = true;
        }
        outcome
    }

    /// Close `id`. `None` when it was not open.
    ///
    /// Closing the current file hands focus to the last file in tab order.
    pub fn close(&mut self, id: &str) -> Option<CloseOutcome> {
        let index = self.open.iter().position(|open| open.as_str() == id)?;
        self.open.remove(index);

        let was_current = self.current.as_deref() == Some(id);
        if was_current {
            self.current = self.open.last().cloned();
        }
        Some(CloseOutcome {
            was_current,
            new_current: self.current.clone(),
        })
    }

    pub fn set_current(&mut self, id: Option<&str>) -> FileResult<()> {
        match id {
            None => self.current = None,
            Some(id) if self.is_open(id) => self.current = Some(NodeId::from(id)),
            Some(id) => return Err(FileError::NotOpen(NodeId::from(id))),
        }
        Ok(())
    }

    pub fn rekey(&mut self, old: &str, new: &NodeId) {
        for open in self.open.iter_mut().filter(|open| open.as_str() == old) {
            *open = new.clone();
        }
        if self.current.as_deref() == Some(old) {
            self.current = Some(new.clone());
        }
    }
}
