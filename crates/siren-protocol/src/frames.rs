//! Frame types for the siren protocol.
//!
//! Inbound frames are parsed into [`ClientFrame`]; outbound frames are either
//! a typed [`ServerFrame`] or a relayed inbound frame with an enrichment
//! payload merged on top (see [`crate::codec::merge`]).

use crate::types::{Position, Role, RouteGeometry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A frame sent by a client.
///
/// Optional fields are read leniently: a value of the wrong shape is treated
/// as absent rather than failing the whole frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Declare the session's role.
    #[serde(rename_all = "camelCase")]
    Identify {
        /// Declared role.
        #[serde(default, deserialize_with = "lenient_or_default")]
        user_type: Role,
    },

    /// Report the session's current location.
    Position {
        /// Reported position; frames without one are still relayed.
        #[serde(default, deserialize_with = "lenient")]
        position: Option<Position>,
    },

    /// An emergency vehicle requests that nearby cars be alerted.
    #[serde(rename_all = "camelCase")]
    AmbulanceAlert {
        /// Emitter's position at the time of the alert.
        #[serde(default, deserialize_with = "lenient")]
        position: Option<Position>,
        /// Route supplied by the emitter, relayed untouched when present.
        #[serde(default)]
        route_geometry: Option<Value>,
        /// Ignore the proximity radius for this alert.
        #[serde(default, deserialize_with = "lenient_or_default")]
        bypass_proximity_check: bool,
    },

    /// Opt in (`"active"`) or out (anything else, including no status).
    AlertStatusChange {
        /// Requested alert status.
        #[serde(default, deserialize_with = "lenient")]
        status: Option<String>,
    },

    /// A geofence on the active route was entered.
    #[serde(rename_all = "camelCase")]
    GeofenceEnter {
        /// Geofence identifier in the persistence collaborator.
        #[serde(default, deserialize_with = "lenient_id")]
        geofence_id: Option<i64>,
        /// Human-readable geofence name.
        #[serde(default, deserialize_with = "lenient")]
        geofence_name: Option<String>,
        /// Remaining distance reported by the client.
        #[serde(default, deserialize_with = "lenient")]
        distance: Option<f64>,
    },

    /// Any other well-formed frame type.
    #[serde(other)]
    Other,
}

impl ClientFrame {
    /// Whether an alert frame asks to skip the proximity radius.
    #[must_use]
    pub fn bypasses_proximity(&self) -> bool {
        matches!(
            self,
            ClientFrame::AmbulanceAlert {
                bypass_proximity_check: true,
                ..
            }
        )
    }

    /// Whether an alert frame carries its own route.
    #[must_use]
    pub fn has_route_geometry(&self) -> bool {
        matches!(
            self,
            ClientFrame::AmbulanceAlert {
                route_geometry: Some(_),
                ..
            }
        )
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Numeric ids may arrive as numbers or numeric strings.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// A typed frame originated by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Welcome sent once a session is registered.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Greeting text.
        message: String,
        /// Assigned session id.
        client_id: String,
        /// Initial alert opt-in state.
        alerts_enabled: bool,
    },

    /// Acknowledges an `alert_status_change` to its sender.
    #[serde(rename_all = "camelCase")]
    AlertStatusChangeConfirmed {
        /// Echoed status.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        /// Resulting opt-in state.
        alerts_enabled: bool,
    },

    /// Tells dispatch consoles that a client changed its opt-in state.
    #[serde(rename_all = "camelCase")]
    ClientAlertPreferenceChanged {
        /// Session whose preference changed.
        client_id: String,
        /// That session's role.
        user_type: Role,
        /// New opt-in state.
        alerts_enabled: bool,
    },

    /// Fan-out of a `geofence_enter` to ambulance and dispatch sessions.
    #[serde(rename_all = "camelCase")]
    GeofenceNotification {
        /// Geofence identifier.
        geofence_id: Option<i64>,
        /// Geofence name.
        geofence_name: Option<String>,
        /// Distance reported by the client.
        distance: Option<f64>,
        /// Server timestamp in milliseconds.
        timestamp: u64,
    },

    /// A position originated by the server itself (simulated vehicles).
    #[serde(rename_all = "camelCase")]
    Position {
        /// Role of the moving vehicle.
        user_type: Role,
        /// Synthetic session id of the vehicle.
        client_id: String,
        /// Current position.
        position: Position,
        /// Server timestamp in milliseconds.
        timestamp: u64,
    },
}

impl ServerFrame {
    /// Create a welcome frame.
    #[must_use]
    pub fn connected(client_id: impl Into<String>, alerts_enabled: bool) -> Self {
        ServerFrame::Connected {
            message: "Connected to siren relay".to_string(),
            client_id: client_id.into(),
            alerts_enabled,
        }
    }

    /// Wire name of the frame type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::AlertStatusChangeConfirmed { .. } => "alert_status_change_confirmed",
            ServerFrame::ClientAlertPreferenceChanged { .. } => "client_alert_preference_changed",
            ServerFrame::GeofenceNotification { .. } => "geofence_notification",
            ServerFrame::Position { .. } => "position",
        }
    }
}

/// Delivery priority of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Always used for ambulance alerts.
    High,
}

/// Server timestamp appended to relayed frames.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Timestamped {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Fields merged into an `ambulance_alert` before delivery to a car.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEnrichment {
    /// Emitter to recipient distance, rounded to whole meters.
    pub distance: u64,
    /// Delivery priority.
    pub priority: Priority,
    /// Dispatch timestamp in milliseconds.
    pub timestamp: u64,
    /// Route to draw on the recipient's map. Left out when the emitter
    /// supplied its own, so the relayed one stays as sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_geometry: Option<RouteGeometry>,
}
