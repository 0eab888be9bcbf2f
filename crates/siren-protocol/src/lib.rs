//! # siren-protocol
//!
//! Wire protocol definitions for the siren proximity alert relay.
//!
//! Clients talk to the relay over a single WebSocket carrying JSON text
//! frames shaped `{"type": ..., ...payload}`.
//!
//! ## Frame Types
//!
//! - `identify` / `position` - Role declaration and location updates
//! - `ambulance_alert` - Emergency alert, enriched before delivery
//! - `alert_status_change` - Opt in or out of alerts
//! - `geofence_enter` - A route geofence was crossed
//!
//! ## Example
//!
//! ```rust
//! use siren_protocol::{codec, ClientFrame};
//!
//! let envelope = codec::decode(r#"{"type":"position","position":{"lat":51.5,"lng":-0.09}}"#).unwrap();
//! assert!(matches!(envelope.frame, ClientFrame::Position { .. }));
//! ```

pub mod codec;
pub mod frames;
pub mod types;

pub use codec::{
    decode, decode_with_limit, encode, merge, Envelope, ProtocolError, DEFAULT_MAX_FRAME_SIZE,
};
pub use frames::{AlertEnrichment, ClientFrame, Priority, ServerFrame, Timestamped};
pub use types::{GeometryKind, Position, Role, RouteGeometry};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
