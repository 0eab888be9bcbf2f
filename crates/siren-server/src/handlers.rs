//! Connection handlers for Siren server.
//!
//! This module handles the session lifecycle, message processing and the
//! simulation control endpoints.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use siren_core::relay::{Connection, Handled};
use siren_core::{AlertEngine, MemoryGeofenceStore, Registry, Relay, RouteGenerator, Simulator};
use siren_protocol::{Position, ProtocolError};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message relay.
    pub relay: Arc<Relay>,
    /// Simulated ambulance driver.
    pub simulator: Simulator,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let routes = RouteGenerator::from_config(&config.routing.to_routing_config());
        let alerts = AlertEngine::new(config.alerts.to_alert_config(), routes);
        let relay = Arc::new(
            Relay::new(
                Arc::new(Registry::new()),
                alerts,
                Arc::new(MemoryGeofenceStore::new()),
            )
            .with_max_frame_size(config.limits.max_message_size),
        );

        Self {
            simulator: Simulator::new(Arc::clone(&relay), config.simulation_interval()),
            relay,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/simulate/start", post(simulate_start_handler))
        .route("/api/simulate/stop", post(simulate_stop_handler))
        .route("/api/simulate/status", get(simulate_status_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Siren server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.relay.registry().len(),
        "registry": state.relay.registry().stats(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let Connection { id, mut outbound } = state.relay.connect();
    metrics::set_active_sessions(state.relay.registry().len());

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Frames queued for this session by the relay
            Some(text) = outbound.recv() => {
                metrics::record_message(text.len(), "outbound");
                if sender.send(Message::Text(text.to_string())).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &id, &text);
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => handle_inbound(&state, &id, &text),
                        Err(_) => {
                            warn!(session = %id, "Dropping non UTF-8 binary frame");
                            metrics::record_error("decode");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: purge the session from the registry and the hub
    state.relay.disconnect(&id);
    metrics::set_active_sessions(state.relay.registry().len());

    debug!(session = %id, "WebSocket disconnected");
}

/// Handle one inbound text frame.
fn handle_inbound(state: &AppState, id: &str, text: &str) {
    let start = Instant::now();
    metrics::record_message(text.len(), "inbound");

    match state.relay.handle_text(id, text) {
        Handled::Alert(report) => {
            metrics::record_alert_decisions(&report);
            let session = id.to_string();
            tokio::spawn(async move {
                let delivered = report.wait().await;
                metrics::record_alerts_delivered(delivered);
                debug!(session = %session, delivered, "Alert deliveries finished");
            });
        }
        Handled::Malformed(ProtocolError::FrameTooLarge { .. }) => {
            metrics::record_error("oversized");
        }
        Handled::Malformed(_) => metrics::record_error("decode"),
        _ => {}
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Simulation start request.
#[derive(Debug, Deserialize)]
struct SimulateRequest {
    #[serde(default)]
    route: Vec<Position>,
}

fn bad_request(message: impl Into<String>) -> Response {
    let message = message.into();
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Start replaying a route as a simulated ambulance.
async fn simulate_start_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SimulateRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected simulation request");
            return bad_request(rejection.body_text());
        }
    };

    match state.simulator.start(request.route).await {
        Ok(session) => {
            debug!(session = %session, "Simulation requested");
            Json(json!({
                "success": true,
                "message": "Simulation started",
            }))
            .into_response()
        }
        Err(e) => bad_request(e.to_string()),
    }
}

/// Stop any running simulation.
async fn simulate_stop_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let purged = state.simulator.stop().await;
    metrics::set_active_sessions(state.relay.registry().len());

    Json(json!({
        "success": true,
        "message": format!("Simulation stopped, {} simulated session(s) removed", purged.len()),
    }))
}

/// Current simulation status.
async fn simulate_status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.simulator.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.routing.enabled = false;
        config.metrics.enabled = false;
        config
    }

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let app = build_router(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, state)
    }

    async fn next_json(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn send_json(ws: &mut Client, value: Value) {
        ws.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    /// Connect and consume the welcome frame, returning the session id.
    async fn connect(addr: SocketAddr) -> (Client, String) {
        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["type"], "connected");
        assert_eq!(welcome["alertsEnabled"], true);
        let id = welcome["clientId"].as_str().unwrap().to_string();
        (ws, id)
    }

    #[tokio::test]
    async fn test_alert_reaches_nearby_car() {
        let (addr, _state) = spawn_server(test_config()).await;
        let (mut car, car_id) = connect(addr).await;
        let (mut ambulance, ambulance_id) = connect(addr).await;

        send_json(
            &mut car,
            json!({"type": "position", "userType": "car", "position": {"lat": 51.5, "lng": -0.1}}),
        )
        .await;

        // Once the relayed position arrives the car's position is stored.
        let relayed = next_json(&mut ambulance).await;
        assert_eq!(relayed["type"], "position");
        assert_eq!(relayed["clientId"], car_id.as_str());
        assert!(relayed["timestamp"].is_u64());

        send_json(
            &mut ambulance,
            json!({
                "type": "ambulance_alert",
                "userType": "ambulance",
                "position": {"lat": 51.5001, "lng": -0.1},
                "message": "Emergency vehicle approaching"
            }),
        )
        .await;

        let alert = next_json(&mut car).await;
        assert_eq!(alert["type"], "ambulance_alert");
        assert_eq!(alert["clientId"], ambulance_id.as_str());
        assert_eq!(alert["message"], "Emergency vehicle approaching");
        assert_eq!(alert["priority"], "high");
        assert!(alert["distance"].as_u64().unwrap() <= 100);
        assert_eq!(alert["routeGeometry"]["type"], "polyline");
        assert!(alert["routeGeometry"]["data"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session_open() {
        let (addr, _state) = spawn_server(test_config()).await;
        let (mut car, _) = connect(addr).await;

        car.send(WsMessage::Text("{not json".into())).await.unwrap();
        send_json(&mut car, json!({"type": "no_such_type"})).await;
        send_json(&mut car, json!({"type": "alert_status_change", "status": "inactive"})).await;

        let confirmed = next_json(&mut car).await;
        assert_eq!(confirmed["type"], "alert_status_change_confirmed");
        assert_eq!(confirmed["status"], "inactive");
        assert_eq!(confirmed["alertsEnabled"], false);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_dropped() {
        let mut config = test_config();
        config.limits.max_message_size = 256;
        let (addr, _state) = spawn_server(config).await;
        let (mut sender, _) = connect(addr).await;
        let (mut viewer, _) = connect(addr).await;

        send_json(
            &mut sender,
            json!({"type": "position", "position": {"lat": 1.0, "lng": 1.0}, "padding": "x".repeat(512)}),
        )
        .await;
        send_json(
            &mut sender,
            json!({"type": "position", "position": {"lat": 2.0, "lng": 2.0}}),
        )
        .await;

        let relayed = next_json(&mut viewer).await;
        assert_eq!(relayed["position"]["lat"], 2.0);
    }

    #[tokio::test]
    async fn test_disconnect_purges_session() {
        let (addr, state) = spawn_server(test_config()).await;
        let (mut car, car_id) = connect(addr).await;
        assert!(state.relay.registry().contains(&car_id));

        let health: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["sessions"], 1);
        assert_eq!(health["registry"]["unknown"], 1);
        assert_eq!(health["registry"]["cars"], 0);

        car.close(None).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !state.relay.registry().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session was not purged");
        assert!(!state.relay.hub().is_attached(&car_id));
    }

    #[tokio::test]
    async fn test_simulation_endpoints() {
        let mut config = test_config();
        config.simulation.interval_ms = 200;
        let (addr, state) = spawn_server(config).await;
        let (mut viewer, _) = connect(addr).await;
        let client = reqwest::Client::new();
        let start_url = format!("http://{addr}/api/simulate/start");

        let empty = client
            .post(&start_url)
            .json(&json!({"route": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = empty.json().await.unwrap();
        assert_eq!(body["error"], "No route provided for simulation");

        let route = json!({"route": [{"lat": 51.5, "lng": -0.1}, {"lat": 51.501, "lng": -0.1}]});
        let started = client.post(&start_url).json(&route).send().await.unwrap();
        assert_eq!(started.status(), reqwest::StatusCode::OK);
        let body: Value = started.json().await.unwrap();
        assert_eq!(body["success"], true);

        let again = client.post(&start_url).json(&route).send().await.unwrap();
        assert_eq!(again.status(), reqwest::StatusCode::BAD_REQUEST);

        let status: Value = client
            .get(format!("http://{addr}/api/simulate/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["simulating"], true);

        let simulated = next_json(&mut viewer).await;
        assert_eq!(simulated["type"], "position");
        assert_eq!(simulated["userType"], "ambulance");
        assert!(simulated["clientId"]
            .as_str()
            .unwrap()
            .starts_with(siren_core::simulation::SIMULATED_ID_PREFIX));

        let stopped: Value = client
            .post(format!("http://{addr}/api/simulate/stop"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["success"], true);

        let status: Value = client
            .get(format!("http://{addr}/api/simulate/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["simulating"], false);
        assert!(status["currentPosition"].is_null());

        // Only the viewer remains registered.
        assert_eq!(state.relay.registry().len(), 1);
    }
}
