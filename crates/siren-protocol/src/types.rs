//! Value types shared by inbound and outbound frames.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// The declared participant kind of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    /// A driver who may receive ambulance alerts.
    Car,
    /// An emergency vehicle emitting alerts and positions.
    Ambulance,
    /// A dispatch console observing the fleet.
    Dispatch,
    /// Not yet identified, or an unrecognized role string.
    #[default]
    Unknown,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Car => "car",
            Role::Ambulance => "ambulance",
            Role::Dispatch => "dispatch",
            Role::Unknown => "unknown",
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "car" => Role::Car,
            "ambulance" => Role::Ambulance,
            "dispatch" => Role::Dispatch,
            _ => Role::Unknown,
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::from(s.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of a route geometry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    /// Google encoded polyline, precision 5.
    Polyline,
    /// A GeoJSON document serialized as a string.
    Geojson,
}

/// A route attached to an alert so the receiver can draw the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    /// How `data` is encoded.
    #[serde(rename = "type")]
    pub kind: GeometryKind,
    /// The encoded route.
    pub data: String,
}

impl RouteGeometry {
    /// Wrap an encoded polyline.
    #[must_use]
    pub fn polyline(data: impl Into<String>) -> Self {
        Self {
            kind: GeometryKind::Polyline,
            data: data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_wire() {
        assert_eq!(serde_json::from_str::<Role>(r#""car""#).unwrap(), Role::Car);
        assert_eq!(
            serde_json::from_str::<Role>(r#""dispatch""#).unwrap(),
            Role::Dispatch
        );
        assert_eq!(
            serde_json::from_str::<Role>(r#""helicopter""#).unwrap(),
            Role::Unknown
        );
        assert_eq!(serde_json::to_string(&Role::Ambulance).unwrap(), r#""ambulance""#);
    }

    #[test]
    fn test_route_geometry_wire_shape() {
        let geometry = RouteGeometry::polyline("_p~iF~ps|U");
        let value = serde_json::to_value(&geometry).unwrap();
        assert_eq!(value["type"], "polyline");
        assert_eq!(value["data"], "_p~iF~ps|U");

        let parsed: RouteGeometry =
            serde_json::from_str(r#"{"type":"geojson","data":"{}"}"#).unwrap();
        assert_eq!(parsed.kind, GeometryKind::Geojson);
    }
}
