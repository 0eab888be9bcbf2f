//! Relay for inbound client frames.
//!
//! The relay owns session lifecycle (connect, disconnect) and dispatches each
//! decoded frame to simple fan-out logic or to the alert engine. Frames from
//! one session are handled in arrival order by that session's task; the relay
//! itself holds no per-session locks across frames.

use crate::alert::{AlertEngine, AlertEvent, AlertReport};
use crate::hub::{Hub, OutboundReceiver};
use crate::registry::Registry;
use crate::session::SessionId;
use crate::storage::GeofenceStore;
use siren_protocol::{
    codec, now_millis, ClientFrame, ProtocolError, Role, ServerFrame, Timestamped,
    DEFAULT_MAX_FRAME_SIZE,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A newly connected session.
#[derive(Debug)]
pub struct Connection {
    /// Assigned session id.
    pub id: SessionId,
    /// Frames queued for this session, starting with the welcome.
    pub outbound: OutboundReceiver,
}

/// What handling one inbound frame did.
#[derive(Debug)]
pub enum Handled {
    /// Session declared its role.
    Identified(Role),
    /// Position stored (when present) and relayed.
    Position {
        /// Sessions the position was relayed to.
        recipients: usize,
    },
    /// Alert evaluated; deliveries may still be in flight.
    Alert(AlertReport),
    /// Alert opt-in changed.
    PreferenceChanged {
        /// New opt-in state.
        enabled: bool,
        /// Dispatch sessions notified.
        notified: usize,
    },
    /// Geofence crossing fanned out.
    Geofence {
        /// Ambulance and dispatch sessions notified.
        notified: usize,
    },
    /// Well-formed frame of a type the relay does not handle.
    Ignored,
    /// Frame could not be decoded and was dropped.
    Malformed(ProtocolError),
}

/// Message relay shared by all session tasks.
pub struct Relay {
    registry: Arc<Registry>,
    hub: Arc<Hub>,
    alerts: AlertEngine,
    geofences: Arc<dyn GeofenceStore>,
    max_frame_size: usize,
}

impl Relay {
    /// Create a relay over the given collaborators.
    #[must_use]
    pub fn new(registry: Arc<Registry>, alerts: AlertEngine, geofences: Arc<dyn GeofenceStore>) -> Self {
        Self {
            registry,
            hub: Arc::new(Hub::new()),
            alerts,
            geofences,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Drop inbound frames larger than `bytes`.
    #[must_use]
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// The client registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The outbound hub.
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Register a new session and queue its welcome frame.
    pub fn connect(&self) -> Connection {
        let id = self.registry.register_new(Role::Unknown);
        let outbound = self.hub.attach(id.clone());
        self.send_frame(&id, &ServerFrame::connected(&id, true));

        info!(session = %id, sessions = self.registry.len(), "Session connected");
        Connection { id, outbound }
    }

    /// Purge a session. Safe to call more than once.
    pub fn disconnect(&self, id: &str) {
        self.hub.detach(id);
        if let Some(session) = self.registry.remove(id) {
            info!(
                session = %id,
                role = %session.role,
                connected_ms = now_millis().saturating_sub(session.connected_at),
                sessions = self.registry.len(),
                "Session disconnected"
            );
        }
    }

    /// Handle one inbound text frame from session `id`.
    pub fn handle_text(&self, id: &str, text: &str) -> Handled {
        let mut envelope = match codec::decode_with_limit(text, self.max_frame_size) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(session = %id, error = %e, "Dropping malformed frame");
                return Handled::Malformed(e);
            }
        };

        debug!(session = %id, frame_type = envelope.frame_type(), "Received frame");

        if let Some(role) = envelope.user_type() {
            self.registry.set_role(id, role);
        }

        let bypass = envelope.frame.bypasses_proximity();
        let route_supplied = envelope.frame.has_route_geometry();

        match envelope.frame.clone() {
            ClientFrame::Identify { user_type } => {
                info!(session = %id, role = %user_type, "Session identified");
                Handled::Identified(user_type)
            }

            ClientFrame::Position { position } => {
                if let Some(position) = position {
                    self.registry.set_position(id, position);
                }
                envelope.stamp_client_id(id);

                let stamp = Timestamped {
                    timestamp: now_millis(),
                };
                let recipients = match codec::merge(&envelope.raw, &stamp) {
                    Ok(text) => self.hub.broadcast(&Arc::from(text), Some(id)),
                    Err(e) => {
                        error!(session = %id, error = %e, "Failed to encode position");
                        0
                    }
                };
                Handled::Position { recipients }
            }

            ClientFrame::AmbulanceAlert { position, .. } => {
                if position.is_none() {
                    warn!(session = %id, "Ambulance alert without a position, no car can be verified in range");
                }
                envelope.stamp_client_id(id);

                let event = AlertEvent {
                    emitter: id.to_string(),
                    raw: envelope.raw,
                    origin: position,
                    route_supplied,
                    bypass_proximity: bypass,
                };
                let report = self.alerts.process(event, &self.registry, &self.hub);
                info!(
                    session = %id,
                    dispatched = report.dispatched(),
                    candidates = report.decisions.len(),
                    "Ambulance alert processed"
                );
                Handled::Alert(report)
            }

            ClientFrame::AlertStatusChange { status } => {
                let enabled = status.as_deref() == Some("active");
                self.registry.set_alert_opt_in(id, enabled);
                debug!(session = %id, enabled, "Alert preference changed");

                self.send_frame(
                    id,
                    &ServerFrame::AlertStatusChangeConfirmed {
                        status,
                        alerts_enabled: enabled,
                    },
                );

                let user_type = self
                    .registry
                    .get(id)
                    .map(|s| s.role)
                    .unwrap_or_default();
                let notice = ServerFrame::ClientAlertPreferenceChanged {
                    client_id: id.to_string(),
                    user_type,
                    alerts_enabled: enabled,
                };
                let notified = self.send_to_roles(&notice, &[Role::Dispatch], Some(id));
                Handled::PreferenceChanged { enabled, notified }
            }

            ClientFrame::GeofenceEnter {
                geofence_id,
                geofence_name,
                distance,
            } => {
                if let Some(geofence_id) = geofence_id {
                    let store = Arc::clone(&self.geofences);
                    tokio::spawn(async move {
                        match store.mark_geofence_passed(geofence_id).await {
                            Ok(Some(_)) => {}
                            Ok(None) => warn!(geofence = geofence_id, "Unknown geofence entered"),
                            Err(e) => {
                                error!(geofence = geofence_id, error = %e, "Failed to mark geofence as passed");
                            }
                        }
                    });
                }

                let notice = ServerFrame::GeofenceNotification {
                    geofence_id,
                    geofence_name,
                    distance,
                    timestamp: now_millis(),
                };
                let notified = self.send_to_roles(&notice, &[Role::Ambulance, Role::Dispatch], None);
                Handled::Geofence { notified }
            }

            ClientFrame::Other => {
                debug!(session = %id, frame_type = envelope.frame_type(), "Ignoring unhandled frame type");
                Handled::Ignored
            }
        }
    }

    /// Queue a typed frame for every connected session.
    pub fn broadcast(&self, frame: &ServerFrame) -> usize {
        match codec::encode(frame) {
            Ok(text) => self.hub.broadcast(&Arc::from(text), None),
            Err(e) => {
                error!(frame_type = frame.type_name(), error = %e, "Failed to encode frame");
                0
            }
        }
    }

    fn send_frame(&self, id: &str, frame: &ServerFrame) -> bool {
        match codec::encode(frame) {
            Ok(text) => self.hub.send_to(id, Arc::from(text)),
            Err(e) => {
                error!(session = %id, frame_type = frame.type_name(), error = %e, "Failed to encode frame");
                false
            }
        }
    }

    fn send_to_roles(&self, frame: &ServerFrame, roles: &[Role], except: Option<&str>) -> usize {
        let text: Arc<str> = match codec::encode(frame) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!(frame_type = frame.type_name(), error = %e, "Failed to encode frame");
                return 0;
            }
        };

        roles
            .iter()
            .flat_map(|role| self.registry.all_by_role(*role))
            .filter(|session| Some(session.id.as_str()) != except)
            .filter(|session| self.hub.send_to(&session.id, Arc::clone(&text)))
            .count()
    }
}
