//! Typed lifecycle notifications.
//!
//! # Delivery
//!
//! Every subscriber owns an unbounded queue. [`EventBus::publish`] enqueues the
//! event to every live subscriber before it returns, so a subscriber observes
//! events in the order the workspace committed them. Nothing is dropped for a
//! slow consumer; subscribers whose receiver was dropped are pruned on the next
//! publish.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut events = workspace.subscribe();
//! workspace.create_temp_file(None)?;
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.kind, FileEventKind::Created);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::node::{FileSnapshot, NodeId};

/// Closed set of lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileEventKind {
    #[serde(rename = "FILE_CREATED")]
    Created,
    #[serde(rename = "FILE_UPDATED")]
    Updated,
    #[serde(rename = "FILE_DELETED")]
    Deleted,
    #[serde(rename = "FILE_MOVED")]
    Moved,
    #[serde(rename = "FILE_RENAMED")]
    Renamed,
    #[serde(rename = "FILE_SELECTED")]
    Selected,
    #[serde(rename = "FILE_CLOSED")]
    Closed,
    #[serde(rename = "FILE_OPENED")]
    Opened,
}

impl FileEventKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "FILE_CREATED",
            Self::Updated => "FILE_UPDATED",
            Self::Deleted => "FILE_DELETED",
            Self::Moved => "FILE_MOVED",
            Self::Renamed => "FILE_RENAMED",
            Self::Selected => "FILE_SELECTED",
            Self::Closed => "FILE_CLOSED",
            Self::Opened => "FILE_OPENED",
        }
    }
}

impl std::fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: FileEventKind,
    /// Node state after the transition
    pub file: FileSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Id or parent before the transition; only for `Moved` and `Renamed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<NodeId>,
    /// Assigned by the bus, strictly increasing
    pub sequence: u64,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, file: FileSnapshot) -> Self {
        Self {
            kind,
            file,
            content: None,
            previous_id: None,
            sequence: 0,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content = content;
        self
    }

    /// `previous_id` is the former parent (`None` for the root)
    pub fn moved(file: FileSnapshot, previous_parent: Option<NodeId>) -> Self {
        Self {
            previous_id: previous_parent,
            ..Self::new(FileEventKind::Moved, file)
        }
    }

    pub fn renamed(file: FileSnapshot, previous_id: NodeId) -> Self {
        Self {
            previous_id: Some(previous_id),
            ..Self::new(FileEventKind::Renamed, file)
        }
    }

    pub fn id(&self) -> &NodeId {
        self.file.id()
    }
}

/// Handle for [`EventBus::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving side of a subscription
#[derive(Debug)]
pub struct EventSubscriber {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl EventSubscriber {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FileEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<FileEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

pub struct EventBus {
    subscribers: Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<FileEvent>)>>,
    next_subscription: AtomicU64,
    sequence: AtomicU64,
    log_events: bool,
}

impl EventBus {
    pub fn new(log_events: bool) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            log_events,
        }
    }

    /// Register a new subscriber.
    ///
    /// Delivery is asynchronous: when the publishing operation returns, the
    /// event is queued for every live subscriber but not yet handled. The
    /// queue is unbounded and keeps publish order, so nothing is dropped or
    /// reordered; a subscriber handles events whenever it drains its queue.
    pub fn subscribe(&self) -> EventSubscriber {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, tx));
        EventSubscriber { id, rx }
    }

    /// Returns whether the subscription existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Stamp the event with the next sequence number and queue it for every
    /// live subscriber.
    pub fn publish(&self, mut event: FileEvent) -> u64 {
        let mut subscribers = self.subscribers.lock();
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        if self.log_events {
            debug!(
                kind = %event.kind,
                id = %event.id(),
                sequence = event.sequence,
                "Publishing file event"
            );
        }

        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        event.sequence
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish()
    }
}
