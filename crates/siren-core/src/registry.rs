//! Client registry.
//!
//! Tracks every live session's role, last position and alert opt-in.
//! Each mutation replaces exactly one field of one session; updates for a
//! session that already disconnected are ignored.

use crate::session::{generate_session_id, Session, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use siren_protocol::{Position, Role};
use tracing::{debug, trace};

/// Registry of connected sessions.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: DashMap<SessionId, Session>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under a caller-chosen id.
    ///
    /// Returns `false` and leaves the existing entry untouched if the id is
    /// already in use.
    pub fn register(&self, id: impl Into<SessionId>, role: Role) -> bool {
        match self.sessions.entry(id.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!(session = %slot.key(), role = %role, "Session registered");
                let session = Session::new(slot.key().clone(), role);
                slot.insert(session);
                true
            }
        }
    }

    /// Register a session under a freshly generated id.
    pub fn register_new(&self, role: Role) -> SessionId {
        loop {
            let id = generate_session_id();
            if self.register(id.clone(), role) {
                return id;
            }
        }
    }

    /// Set a session's role. Returns `false` if the session is gone.
    pub fn set_role(&self, id: &str, role: Role) -> bool {
        self.update(id, |s| s.role = role)
    }

    /// Replace a session's position. Returns `false` if the session is gone.
    pub fn set_position(&self, id: &str, position: Position) -> bool {
        self.update(id, |s| s.position = Some(position))
    }

    /// Set a session's alert opt-in. Returns `false` if the session is gone.
    pub fn set_alert_opt_in(&self, id: &str, enabled: bool) -> bool {
        self.update(id, |s| s.alerts_enabled = enabled)
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut Session)) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                apply(&mut session);
                true
            }
            None => {
                trace!(session = %id, "Update for unknown session ignored");
                false
            }
        }
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Check if a session is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Sessions with the given role, as of the time of the call.
    pub fn all_by_role(&self, role: Role) -> impl Iterator<Item = Session> {
        let matching: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.role == role)
            .map(|s| s.clone())
            .collect();
        matching.into_iter()
    }

    /// Remove a session and everything known about it.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        if removed.is_some() {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Remove every session whose id starts with `prefix`.
    ///
    /// Returns the removed ids.
    pub fn remove_by_prefix(&self, prefix: &str) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.key().starts_with(prefix))
            .map(|s| s.key().clone())
            .collect();

        ids.into_iter().filter(|id| self.remove(id).is_some()).collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for session in self.sessions.iter() {
            stats.sessions += 1;
            match session.role {
                Role::Car => stats.cars += 1,
                Role::Ambulance => stats.ambulances += 1,
                Role::Dispatch => stats.dispatch += 1,
                Role::Unknown => stats.unknown += 1,
            }
            if session.position.is_some() {
                stats.positioned += 1;
            }
        }
        stats
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered sessions.
    pub sessions: usize,
    /// Sessions with role `car`.
    pub cars: usize,
    /// Sessions with role `ambulance`.
    pub ambulances: usize,
    /// Sessions with role `dispatch`.
    pub dispatch: usize,
    /// Sessions that have not identified.
    pub unknown: usize,
    /// Sessions with a known position.
    pub positioned: usize,
}
