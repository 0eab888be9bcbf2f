//! Route geometry generation.
//!
//! A routing provider is consulted first, bounded by a timeout. Any failure
//! falls back to a straight line with interpolated points, so callers always
//! get a route and never see a provider error.

use crate::geo::interpolate;
use crate::polyline;
use async_trait::async_trait;
use serde::Deserialize;
use siren_protocol::{Position, RouteGeometry};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Google Directions JSON endpoint.
pub const DEFAULT_DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

/// Intermediate points in the fallback route.
pub const DEFAULT_FALLBACK_POINTS: usize = 5;

/// Routing provider errors.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No API key or provider configured.
    #[error("Routing provider not configured")]
    NotConfigured,

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    /// Provider answered but reported an error status.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Response body could not be understood.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Provider did not answer in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Routing configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Whether to call the routing provider at all.
    pub enabled: bool,
    /// Directions endpoint.
    pub base_url: String,
    /// Provider API key.
    pub api_key: Option<String>,
    /// Upper bound on a provider call.
    pub timeout: Duration,
    /// Intermediate points in the fallback route.
    pub fallback_points: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_DIRECTIONS_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(3),
            fallback_points: DEFAULT_FALLBACK_POINTS,
        }
    }
}

/// A service that can produce a road route between two points.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Fetch an encoded polyline from `start` to `end`.
    async fn route(&self, start: Position, end: Position) -> Result<String, RouteError>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    overview_polyline: OverviewPolyline,
}

#[derive(Debug, Deserialize)]
struct OverviewPolyline {
    points: String,
}

/// Directions API client.
pub struct DirectionsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl DirectionsProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    /// Create a provider with a shared HTTP client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl RouteProvider for DirectionsProvider {
    async fn route(&self, start: Position, end: Position) -> Result<String, RouteError> {
        let api_key = self.api_key.as_deref().ok_or(RouteError::NotConfigured)?;

        debug!(%start, %end, "Requesting route from directions provider");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("origin", start.to_string()),
                ("destination", end.to_string()),
                ("mode", "driving".to_string()),
                ("key", api_key.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouteError::Status(status.as_u16()));
        }

        let body: DirectionsResponse = response
            .json()
            .await
            .map_err(|e| RouteError::Malformed(e.to_string()))?;

        if body.status != "OK" {
            return Err(RouteError::Provider(body.status));
        }

        let points = body
            .routes
            .into_iter()
            .next()
            .map(|r| r.overview_polyline.points)
            .ok_or_else(|| RouteError::Malformed("no routes".to_string()))?;

        if polyline::decode(&points).is_none() {
            return Err(RouteError::Malformed("invalid polyline".to_string()));
        }

        Ok(points)
    }

    fn name(&self) -> &'static str {
        "directions"
    }
}

/// Produces route geometry for alerts, never failing.
#[derive(Clone)]
pub struct RouteGenerator {
    provider: Option<Arc<dyn RouteProvider>>,
    timeout: Duration,
    fallback_points: usize,
}

impl RouteGenerator {
    /// Create a generator backed by `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn RouteProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
            fallback_points: DEFAULT_FALLBACK_POINTS,
        }
    }

    /// Create a generator that only produces fallback routes.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            provider: None,
            timeout: Duration::ZERO,
            fallback_points: DEFAULT_FALLBACK_POINTS,
        }
    }

    /// Build a generator from configuration.
    #[must_use]
    pub fn from_config(config: &RoutingConfig) -> Self {
        let generator = if config.enabled {
            let provider = DirectionsProvider::new(&config.base_url, config.api_key.clone());
            Self::new(Arc::new(provider), config.timeout)
        } else {
            Self::offline()
        };
        generator.with_fallback_points(config.fallback_points)
    }

    /// Set the number of intermediate points in the fallback route.
    #[must_use]
    pub fn with_fallback_points(mut self, points: usize) -> Self {
        self.fallback_points = points;
        self
    }

    /// Route from `start` to `end`, falling back to a straight line.
    pub async fn generate(&self, start: Position, end: Position) -> RouteGeometry {
        let Some(provider) = &self.provider else {
            return RouteGeometry::polyline(simplified_route(start, end, self.fallback_points));
        };

        let result = match tokio::time::timeout(self.timeout, provider.route(start, end)).await {
            Ok(result) => result,
            Err(_) => Err(RouteError::Timeout(self.timeout)),
        };

        match result {
            Ok(points) => {
                debug!(provider = provider.name(), "Route retrieved from provider");
                RouteGeometry::polyline(points)
            }
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Routing failed, using simplified route");
                RouteGeometry::polyline(simplified_route(start, end, self.fallback_points))
            }
        }
    }
}

impl Default for RouteGenerator {
    fn default() -> Self {
        Self::offline()
    }
}

/// Straight-line route with `n` evenly spaced intermediate points.
///
/// The result holds `n + 2` points including both ends and depends only on
/// its inputs.
#[must_use]
pub fn simplified_route(start: Position, end: Position, n: usize) -> String {
    polyline::encode(&simplified_points(start, end, n))
}

fn simplified_points(start: Position, end: Position, n: usize) -> Vec<Position> {
    let mut points = Vec::with_capacity(n + 2);
    points.push(start);
    for i in 1..=n {
        let fraction = i as f64 / (n + 1) as f64;
        points.push(interpolate(start, end, fraction));
    }
    points.push(end);
    points
}
