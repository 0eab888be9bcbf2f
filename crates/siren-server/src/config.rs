//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (SIREN_HOST, SIREN_PORT, GOOGLE_MAPS_API_KEY)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use siren_core::alert::{DEFAULT_ALERT_RADIUS_M, DEFAULT_FALLBACK_POINTS};
use siren_core::geo::DEFAULT_CORRECTION_FACTOR;
use siren_core::route::{DEFAULT_DIRECTIONS_URL, DEFAULT_FALLBACK_POINTS as ROUTE_FALLBACK_POINTS};
use siren_core::{AlertConfig, RoutingConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Proximity alert tuning.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// External routing provider.
    #[serde(default)]
    pub routing: RoutingSection,

    /// Simulated ambulance.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes; larger frames are dropped.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Proximity alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Alert radius in meters.
    #[serde(default = "default_radius")]
    pub radius_m: f64,

    /// Scale applied to raw device-to-device distance.
    #[serde(default = "default_correction_factor")]
    pub correction_factor: f64,

    /// Points in the route sent when route generation fails outright.
    #[serde(default = "default_alert_fallback_points")]
    pub fallback_points: usize,
}

/// Routing provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    /// Call the routing provider for alert routes.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directions endpoint.
    #[serde(default = "default_directions_url")]
    pub base_url: String,

    /// Provider API key.
    #[serde(default = "default_api_key", skip_serializing)]
    pub api_key: Option<String>,

    /// Provider call timeout in milliseconds.
    #[serde(default = "default_routing_timeout")]
    pub timeout_ms: u64,

    /// Intermediate points in the straight-line fallback route.
    #[serde(default = "default_route_fallback_points")]
    pub fallback_points: usize,
}

/// Simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Time between simulated positions in milliseconds.
    #[serde(default = "default_simulation_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("SIREN_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("SIREN_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    siren_protocol::DEFAULT_MAX_FRAME_SIZE
}

fn default_radius() -> f64 {
    DEFAULT_ALERT_RADIUS_M
}

fn default_correction_factor() -> f64 {
    DEFAULT_CORRECTION_FACTOR
}

fn default_alert_fallback_points() -> usize {
    DEFAULT_FALLBACK_POINTS
}

fn default_directions_url() -> String {
    DEFAULT_DIRECTIONS_URL.to_string()
}

fn default_api_key() -> Option<String> {
    std::env::var("GOOGLE_MAPS_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

fn default_routing_timeout() -> u64 {
    3_000 // 3 seconds
}

fn default_route_fallback_points() -> usize {
    ROUTE_FALLBACK_POINTS
}

fn default_simulation_interval() -> u64 {
    1_000 // 1 second
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            alerts: AlertsConfig::default(),
            routing: RoutingSection::default(),
            simulation: SimulationConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius(),
            correction_factor: default_correction_factor(),
            fallback_points: default_alert_fallback_points(),
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_directions_url(),
            api_key: default_api_key(),
            timeout_ms: default_routing_timeout(),
            fallback_points: default_route_fallback_points(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_simulation_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl AlertsConfig {
    /// Engine configuration for these settings.
    #[must_use]
    pub fn to_alert_config(&self) -> AlertConfig {
        AlertConfig {
            radius_m: self.radius_m,
            correction_factor: self.correction_factor,
            fallback_points: self.fallback_points,
        }
    }
}

impl RoutingSection {
    /// Route generator configuration for these settings.
    #[must_use]
    pub fn to_routing_config(&self) -> RoutingConfig {
        RoutingConfig {
            enabled: self.enabled,
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            fallback_points: self.fallback_points,
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "siren.toml",
            "/etc/siren/siren.toml",
            "~/.config/siren/siren.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Simulation tick interval.
    #[must_use]
    pub fn simulation_interval(&self) -> Duration {
        Duration::from_millis(self.simulation.interval_ms)
    }
}
