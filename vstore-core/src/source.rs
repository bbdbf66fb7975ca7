//! Event source binding
//!
//! A single item state manager applies changes on behalf of many sessions.
//! To attribute the resulting notifications to the right session, every
//! mutation runs inside [`EventSourceBinding::run_with_source`], which makes
//! the invoking [`Actor`] the current event source for exactly the duration
//! of that mutation. Mutations are serialized by the binding; readers are
//! not affected.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, VersionError};
use crate::observation::EventStateCollection;

/// Session on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub workspace: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            workspace: workspace.into(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user_id, self.workspace)
    }
}

/// Binds the current mutation to the actor that requested it
pub struct EventSourceBinding {
    root_path: String,
    /// Held for the whole of one sourced mutation
    exclusive: tokio::sync::Mutex<()>,
    /// Current event source; only set inside `run_with_source`
    source: Mutex<Option<Actor>>,
}

/// Clears the current source when the sourced operation ends, however it ends
struct SourceScope<'a> {
    slot: &'a Mutex<Option<Actor>>,
}

impl<'a> SourceScope<'a> {
    fn bind(slot: &'a Mutex<Option<Actor>>, actor: Actor) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(actor);
        Self { slot }
    }
}

impl Drop for SourceScope<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl EventSourceBinding {
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            exclusive: tokio::sync::Mutex::new(()),
            source: Mutex::new(None),
        }
    }

    /// Run `operation` with `actor` as the event source.
    ///
    /// Only one sourced operation runs at a time. The binding is cleared when
    /// the operation finishes, fails, or is dropped mid-flight.
    pub async fn run_with_source<T, F>(&self, actor: &Actor, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _exclusive = self.exclusive.lock().await;
        let _scope = SourceScope::bind(&self.source, actor.clone());
        tracing::trace!("running sourced operation for {}", actor);
        operation.await
    }

    /// The actor bound to the mutation in flight, if any
    pub fn current_source(&self) -> Option<Actor> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create a notification batch attributed to the current source.
    ///
    /// Fails with [`VersionError::UnknownEventSource`] outside of
    /// `run_with_source`.
    pub fn create_event_collection(&self) -> Result<EventStateCollection> {
        match self.current_source() {
            Some(actor) => Ok(self.create_event_collection_for(Some(actor))),
            None => Err(VersionError::UnknownEventSource),
        }
    }

    /// Create a notification batch for an explicit source (`None` for
    /// external updates)
    pub fn create_event_collection_for(&self, source: Option<Actor>) -> EventStateCollection {
        EventStateCollection::new(source, self.root_path.clone())
    }
}
