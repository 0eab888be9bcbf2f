//! Session state and identifiers.

use siren_protocol::{now_millis, Position, Role};
use std::sync::atomic::{AtomicU64, Ordering};

/// A session identifier.
pub type SessionId = String;

/// Atomic counter for ensuring unique IDs even within the same millisecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a session ID that is unique for the life of the process.
#[must_use]
pub fn generate_session_id() -> SessionId {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now_millis(), counter)
}

/// Server-side state of one connected client.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Declared role.
    pub role: Role,
    /// Last reported position.
    pub position: Option<Position>,
    /// Whether the client wants ambulance alerts.
    pub alerts_enabled: bool,
    /// When the session was registered (ms since epoch).
    pub connected_at: u64,
}

impl Session {
    /// Create a session with no position and alerts enabled.
    #[must_use]
    pub fn new(id: impl Into<SessionId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            position: None,
            alerts_enabled: true,
            connected_at: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_defaults() {
        let session = Session::new("s-1", Role::Unknown);
        assert!(session.alerts_enabled);
        assert!(session.position.is_none());
    }

    #[test]
    fn test_unique_session_ids() {
        let ids: HashSet<_> = (0..1000).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
