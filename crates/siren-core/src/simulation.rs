//! Simulated ambulance.
//!
//! Replays a route as a synthetic ambulance session, one point per tick,
//! broadcasting each point to every connected session the same way a real
//! ambulance's position would be relayed.

use crate::registry::Registry;
use crate::relay::Relay;
use crate::session::{generate_session_id, SessionId};
use serde::Serialize;
use siren_protocol::{now_millis, Position, Role, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Prefix of every synthetic session id.
pub const SIMULATED_ID_PREFIX: &str = "simulated-ambulance-";

/// Default time between simulated position updates.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Simulation control errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    /// A simulation is already in progress.
    #[error("Simulation already running")]
    AlreadyRunning,

    /// The route has no points.
    #[error("No route provided for simulation")]
    EmptyRoute,
}

/// Externally visible simulation state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    /// Whether a route is being replayed.
    #[serde(rename = "simulating")]
    pub running: bool,
    /// Last broadcast point, while running.
    pub current_position: Option<Position>,
}

#[derive(Debug, Default)]
struct SimulationState {
    running: bool,
    current: Option<Position>,
    session_id: Option<SessionId>,
    task: Option<JoinHandle<()>>,
    run: u64,
}

/// Drives at most one simulated ambulance at a time.
pub struct Simulator {
    relay: Arc<Relay>,
    interval: Duration,
    state: Arc<Mutex<SimulationState>>,
}

impl Simulator {
    /// Create a simulator ticking every `interval`.
    #[must_use]
    pub fn new(relay: Arc<Relay>, interval: Duration) -> Self {
        Self {
            relay,
            interval,
            state: Arc::new(Mutex::new(SimulationState::default())),
        }
    }

    /// Start replaying `route`.
    ///
    /// Returns the synthetic session id.
    ///
    /// # Errors
    ///
    /// Returns an error if a simulation is running or the route is empty.
    pub async fn start(&self, route: Vec<Position>) -> Result<SessionId, SimulationError> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(SimulationError::AlreadyRunning);
        }
        if route.is_empty() {
            return Err(SimulationError::EmptyRoute);
        }

        let id = format!("{SIMULATED_ID_PREFIX}{}", generate_session_id());
        self.relay.registry().register(id.clone(), Role::Ambulance);

        state.run += 1;
        state.running = true;
        state.current = None;
        state.session_id = Some(id.clone());

        info!(session = %id, points = route.len(), "Simulation started");

        let ticker = Ticker {
            relay: Arc::clone(&self.relay),
            state: Arc::clone(&self.state),
            session_id: id.clone(),
            run: state.run,
            route,
            interval: self.interval,
        };
        state.task = Some(tokio::spawn(ticker.run()));

        Ok(id)
    }

    /// Stop any simulation and purge every synthetic session.
    ///
    /// Returns the purged session ids.
    pub async fn stop(&self) -> Vec<SessionId> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.running = false;
        state.current = None;
        state.session_id = None;

        let purged = self.relay.registry().remove_by_prefix(SIMULATED_ID_PREFIX);
        info!(purged = purged.len(), "Simulation stopped");
        purged
    }

    /// Current simulation status.
    pub async fn status(&self) -> SimulationStatus {
        let state = self.state.lock().await;
        SimulationStatus {
            running: state.running,
            current_position: if state.running { state.current } else { None },
        }
    }
}

struct Ticker {
    relay: Arc<Relay>,
    state: Arc<Mutex<SimulationState>>,
    session_id: SessionId,
    run: u64,
    route: Vec<Position>,
    interval: Duration,
}

impl Ticker {
    async fn run(self) {
        let mut ticks = interval_at(Instant::now() + self.interval, self.interval);

        for &position in &self.route {
            ticks.tick().await;
            self.advance(position).await;
        }
        ticks.tick().await;

        self.finish(self.relay.registry()).await;
    }

    async fn advance(&self, position: Position) {
        self.relay.registry().set_position(&self.session_id, position);
        self.state.lock().await.current = Some(position);

        let frame = ServerFrame::Position {
            user_type: Role::Ambulance,
            client_id: self.session_id.clone(),
            position,
            timestamp: now_millis(),
        };
        let recipients = self.relay.broadcast(&frame);
        debug!(session = %self.session_id, %position, recipients, "Simulated position sent");
    }

    async fn finish(&self, registry: &Registry) {
        let mut state = self.state.lock().await;
        if state.run == self.run {
            state.running = false;
            state.current = None;
            state.session_id = None;
            state.task = None;
        }
        registry.remove(&self.session_id);
        info!(session = %self.session_id, "Simulation finished");
    }
}
