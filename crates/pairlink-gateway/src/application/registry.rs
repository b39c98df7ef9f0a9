//! SessionRegistry: the in-memory table of every session the gateway knows.
//!
//! Each entry is a [`SessionRecord`]: the observable [`SessionState`] plus the
//! runtime handles that never leave the process (the connector, its epoch,
//! and the two deferred-task slots).
//!
//! The registry is storage only.  Every decision about what to put in it is
//! made by the supervisor.
//!
//! # Locking
//!
//! One `parking_lot::RwLock` guards the whole map.  Status polls take the
//! read lock and clone a snapshot; the supervisor takes the write lock for
//! the duration of a single closure.  No lock is ever held across an
//! `.await`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use pairlink_core::{SessionId, SessionState};
use parking_lot::RwLock;

use crate::application::ports::ProtocolConnector;
use crate::application::tasks::TaskSlot;

/// Epoch of a record whose connector has been retired for good.
pub const RETIRED_EPOCH: u64 = 0;

/// One registry entry.
pub struct SessionRecord {
    pub state: SessionState,
    /// The live connector, if one has been installed.
    pub connector: Option<Arc<dyn ProtocolConnector>>,
    /// Identifies the connector generation.  Events tagged with an older
    /// epoch come from a superseded connector and are dropped.
    pub epoch: u64,
    pub reconnect_task: TaskSlot,
    pub qr_render_task: TaskSlot,
}

impl SessionRecord {
    pub fn new(state: SessionState, epoch: u64) -> Self {
        Self {
            state,
            connector: None,
            epoch,
            reconnect_task: TaskSlot::new(),
            qr_render_task: TaskSlot::new(),
        }
    }

    /// Aborts both deferred tasks.
    pub fn cancel_tasks(&mut self) {
        self.reconnect_task.cancel();
        self.qr_render_task.cancel();
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("state", &self.state)
            .field("has_connector", &self.connector.is_some())
            .field("epoch", &self.epoch)
            .field("reconnect_task", &self.reconnect_task)
            .field("qr_render_task", &self.qr_render_task)
            .finish()
    }
}

/// Concurrent map from session id to [`SessionRecord`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of one session's state.
    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        self.sessions
            .read()
            .get(session_id)
            .map(|record| record.state.clone())
    }

    /// Returns a snapshot of every session, sorted by id.
    pub fn list(&self) -> Vec<SessionState> {
        let mut states: Vec<SessionState> = self
            .sessions
            .read()
            .values()
            .map(|record| record.state.clone())
            .collect();
        states.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        states
    }

    /// Every id currently in the registry, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Inserts or replaces a record, returning the previous one.
    pub fn upsert(&self, record: SessionRecord) -> Option<SessionRecord> {
        let id = record.state.session_id.clone();
        self.sessions.write().insert(id, record)
    }

    /// Removes a record.  Removing a missing id is a no-op.
    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.write().remove(session_id)
    }

    /// Runs `f` on one record under the write lock.
    ///
    /// Returns `None` without calling `f` if the id is unknown.
    pub fn update<T>(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord) -> T) -> Option<T> {
        self.sessions.write().get_mut(session_id).map(f)
    }

    /// Runs `f` on the map entry for `session_id` under the write lock.
    ///
    /// Used for check-then-insert sequences that must be atomic.
    pub fn with_entry<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(Entry<'_, SessionId, SessionRecord>) -> T,
    ) -> T {
        let mut sessions = self.sessions.write();
        f(sessions.entry(session_id.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
