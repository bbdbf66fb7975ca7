//! Change notifications for the version storage
//!
//! Every applied change log produces an [`EventStateCollection`] that is
//! handed to an [`ObservationDispatcher`] once the change is durable.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::id::NodeId;
use crate::source::Actor;
use crate::state::{ChangeLog, StorageRoots};

/// Kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    NodeAdded,
    NodeModified,
    NodeRemoved,
}

/// A single change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventState {
    pub kind: EventKind,
    pub id: NodeId,
    pub parent: NodeId,
    /// User that caused the change, if known
    pub user_id: Option<String>,
}

/// Notifications produced by one change log
#[derive(Debug, Clone)]
pub struct EventStateCollection {
    source: Option<Actor>,
    root_path: String,
    events: Vec<EventState>,
    timestamp: i64,
    user_data: Option<String>,
}

impl EventStateCollection {
    pub fn new(source: Option<Actor>, root_path: impl Into<String>) -> Self {
        Self {
            source,
            root_path: root_path.into(),
            events: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            user_data: None,
        }
    }

    /// Add one event per item touched by the change log
    pub fn create_events(&mut self, changes: &ChangeLog, roots: &StorageRoots) {
        let user_id = self.source.as_ref().map(|s| s.user_id.clone());
        let events = changes
            .added_states()
            .iter()
            .map(|s| (EventKind::NodeAdded, s))
            .chain(changes.modified_states().iter().map(|s| (EventKind::NodeModified, s)))
            .chain(changes.deleted_states().iter().map(|s| (EventKind::NodeRemoved, s)))
            .map(|(kind, state)| EventState {
                kind,
                id: state.id(),
                parent: state.parent_id(roots),
                user_id: user_id.clone(),
            });
        self.events.extend(events);
    }

    pub fn add_all(&mut self, events: impl IntoIterator<Item = EventState>) {
        self.events.extend(events);
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn set_user_data(&mut self, user_data: Option<String>) {
        self.user_data = user_data;
    }

    pub fn source(&self) -> Option<&Actor> {
        self.source.as_ref()
    }

    /// True for notifications that did not originate from a local actor
    pub fn is_external(&self) -> bool {
        self.source.is_none()
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn events(&self) -> &[EventState] {
        &self.events
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Receives notification batches after they have been applied
pub trait ObservationDispatcher: Send + Sync {
    fn dispatch(&self, events: EventStateCollection);
}

/// Dispatcher that fans notifications out to any number of subscribers
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<Arc<EventStateCollection>>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventStateCollection>> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ObservationDispatcher for BroadcastDispatcher {
    fn dispatch(&self, events: EventStateCollection) {
        if events.is_empty() {
            return;
        }
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(events));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SYSTEM_NODE_ID;
    use crate::state::{ItemState, RootKind, RootRecord};

    #[test]
    fn test_events_from_change_log() {
        let actor = Actor::new("alice", "default");
        let mut log = ChangeLog::new();
        let root =
            |kind| ItemState::Root(RootRecord::new(NodeId::new_random(), SYSTEM_NODE_ID, kind));
        let added = root(RootKind::Histories);
        let removed = root(RootKind::Activities);
        log.added(added.clone());
        log.deleted(removed.clone());

        let mut esc = EventStateCollection::new(Some(actor), "/jcr:system");
        esc.create_events(&log, &StorageRoots::default());

        assert_eq!(esc.events().len(), 2);
        assert_eq!(esc.events()[0].kind, EventKind::NodeAdded);
        assert_eq!(esc.events()[0].id, added.id());
        assert_eq!(esc.events()[1].kind, EventKind::NodeRemoved);
        assert_eq!(esc.events()[1].user_id.as_deref(), Some("alice"));
        assert!(!esc.is_external());
    }

    #[tokio::test]
    async fn test_broadcast_dispatcher() {
        let dispatcher = BroadcastDispatcher::new(8);
        let mut rx = dispatcher.subscribe();

        let mut esc = EventStateCollection::new(None, "/jcr:system");
        esc.add_all([EventState {
            kind: EventKind::NodeModified,
            id: NodeId::new_random(),
            parent: SYSTEM_NODE_ID,
            user_id: None,
        }]);
        dispatcher.dispatch(esc);

        let received = rx.recv().await.unwrap();
        assert!(received.is_external());
        assert_eq!(received.events().len(), 1);
    }
}
