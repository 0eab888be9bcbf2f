//! Geofence persistence.
//!
//! The relay only needs to flag a geofence as passed. The in-memory store
//! backs the server when no database is attached and serves the tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use siren_protocol::{now_millis, Position};
use thiserror::Error;
use tracing::debug;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not complete the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A named circular zone along a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    /// Geofence identifier.
    pub id: i64,
    /// Route this geofence belongs to.
    pub route_id: i64,
    /// Center of the zone.
    pub location: Position,
    /// Radius in meters.
    pub radius: u32,
    /// Display name.
    pub name: String,
    /// Whether a vehicle has passed through.
    pub passed: bool,
    /// Distance from the route destination, in meters.
    pub distance: Option<u32>,
    /// Whether the pass notification went out.
    pub notification_sent: bool,
    /// When the geofence was last marked (ms since epoch).
    pub timestamp: Option<u64>,
}

/// Persistence collaborator for geofence state.
#[async_trait]
pub trait GeofenceStore: Send + Sync {
    /// Mark a geofence as passed.
    ///
    /// Returns the updated geofence, or `None` if the id is unknown.
    async fn mark_geofence_passed(&self, id: i64) -> Result<Option<Geofence>, StoreError>;
}

/// Geofence store held in memory.
#[derive(Debug, Default)]
pub struct MemoryGeofenceStore {
    geofences: DashMap<i64, Geofence>,
}

impl MemoryGeofenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a geofence.
    pub fn insert(&self, geofence: Geofence) {
        self.geofences.insert(geofence.id, geofence);
    }

    /// Snapshot of one geofence.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<Geofence> {
        self.geofences.get(&id).map(|g| g.clone())
    }
}

#[async_trait]
impl GeofenceStore for MemoryGeofenceStore {
    async fn mark_geofence_passed(&self, id: i64) -> Result<Option<Geofence>, StoreError> {
        let Some(mut geofence) = self.geofences.get_mut(&id) else {
            return Ok(None);
        };

        geofence.passed = true;
        geofence.notification_sent = true;
        geofence.timestamp = Some(now_millis());
        debug!(geofence = id, name = %geofence.name, "Geofence marked as passed");

        Ok(Some(geofence.clone()))
    }
}
