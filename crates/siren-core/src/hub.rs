//! Outbound fan-out to connected sessions.
//!
//! Each session owns an unbounded queue drained by its socket task. Encoded
//! frames are shared as `Arc<str>` so a broadcast encodes once.

use crate::session::SessionId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// An encoded outbound text frame.
pub type Outbound = Arc<str>;

/// Receiving half handed to a session's socket task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Per-session outbound queues.
#[derive(Debug, Default)]
pub struct Hub {
    outboxes: DashMap<SessionId, mpsc::UnboundedSender<Outbound>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an outbound queue for a session.
    ///
    /// Replaces any queue previously attached under the same id.
    pub fn attach(&self, id: impl Into<SessionId>) -> OutboundReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = id.into();
        debug!(session = %id, "Outbox attached");
        self.outboxes.insert(id, tx);
        rx
    }

    /// Close a session's outbound queue.
    pub fn detach(&self, id: &str) -> bool {
        self.outboxes.remove(id).is_some()
    }

    /// Queue a frame for one session.
    ///
    /// Returns `false` if the session is not attached or its receiver is gone.
    pub fn send_to(&self, id: &str, frame: Outbound) -> bool {
        match self.outboxes.get(id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => {
                trace!(session = %id, "Send to detached session dropped");
                false
            }
        }
    }

    /// Queue a frame for every attached session except `except`.
    ///
    /// Returns the number of sessions the frame was queued for.
    pub fn broadcast(&self, frame: &Outbound, except: Option<&str>) -> usize {
        self.outboxes
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != except)
            .filter(|entry| entry.value().send(Arc::clone(frame)).is_ok())
            .count()
    }

    /// Check if a session is attached.
    #[must_use]
    pub fn is_attached(&self, id: &str) -> bool {
        self.outboxes.contains_key(id)
    }

    /// Number of attached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Check if no sessions are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }
}
