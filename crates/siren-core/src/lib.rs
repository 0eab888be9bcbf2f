//! # siren-core
//!
//! Session state, proximity decisions and message relaying for the siren
//! emergency alert service.
//!
//! This crate provides the building blocks behind the WebSocket surface:
//!
//! - **Geo** - Great-circle distance and bearing
//! - **Registry** - Per-session role, position and alert opt-in
//! - **Route** - Route geometry from a routing provider, with a local fallback
//! - **Alert** - Proximity alert evaluation and dispatch
//! - **Relay** - Inbound frame handling and fan-out
//! - **Simulation** - Replays a route as a synthetic ambulance
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│    Relay    │────▶│     Hub     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │               ▲
//!                        ▼       ▼               │
//!                 ┌──────────┐ ┌─────────────┐   │
//!                 │ Registry │ │ AlertEngine │───┘
//!                 └──────────┘ └─────────────┘
//!                                     │
//!                                     ▼
//!                              ┌─────────────┐
//!                              │ RouteGen    │
//!                              └─────────────┘
//! ```

pub mod alert;
pub mod geo;
pub mod hub;
pub mod polyline;
pub mod registry;
pub mod relay;
pub mod route;
pub mod session;
pub mod simulation;
pub mod storage;

pub use alert::{AlertConfig, AlertEngine, AlertReport, Decision, Outcome, SkipReason};
pub use hub::Hub;
pub use registry::{Registry, RegistryStats};
pub use relay::Relay;
pub use route::{DirectionsProvider, RouteError, RouteGenerator, RouteProvider, RoutingConfig};
pub use session::{Session, SessionId};
pub use simulation::{SimulationError, SimulationStatus, Simulator};
pub use storage::{Geofence, GeofenceStore, MemoryGeofenceStore, StoreError};
