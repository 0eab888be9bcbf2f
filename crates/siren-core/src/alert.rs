//! Proximity alert engine.
//!
//! Decides which car sessions receive an ambulance alert and delivers an
//! enriched copy to each of them. Every candidate is evaluated against the
//! registry as it stands when the alert is processed, and each delivery runs
//! in its own task so a slow route lookup for one car never holds up another.

use crate::geo::{corrected_distance, initial_bearing_degrees, DEFAULT_CORRECTION_FACTOR};
use crate::hub::Hub;
use crate::registry::Registry;
use crate::route::{simplified_route, RouteGenerator};
use crate::session::SessionId;
use serde_json::{Map, Value};
use siren_protocol::{codec, now_millis, AlertEnrichment, Position, Priority, Role, RouteGeometry};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Default alert radius in meters.
pub const DEFAULT_ALERT_RADIUS_M: f64 = 100.0;

/// Intermediate points used when route generation itself fails.
pub const DEFAULT_FALLBACK_POINTS: usize = 8;

/// Alert engine configuration.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Maximum corrected distance at which a car is alerted.
    pub radius_m: f64,
    /// Scale applied to raw haversine distance.
    pub correction_factor: f64,
    /// Points in the last-resort simplified route.
    pub fallback_points: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            radius_m: DEFAULT_ALERT_RADIUS_M,
            correction_factor: DEFAULT_CORRECTION_FACTOR,
            fallback_points: DEFAULT_FALLBACK_POINTS,
        }
    }
}

/// Why a candidate was not alerted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Either side has no known position, so proximity cannot be verified.
    MissingPosition,
    /// The candidate opted out of alerts.
    AlertsDisabled,
    /// The candidate is beyond the alert radius and no bypass was requested.
    OutOfRange,
}

impl SkipReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingPosition => "missing_position",
            SkipReason::AlertsDisabled => "alerts_disabled",
            SkipReason::OutOfRange => "out_of_range",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Send the alert.
    Dispatch {
        /// Corrected distance in meters.
        distance_m: f64,
        /// Candidate's position at evaluation time.
        target: Position,
    },
    /// Do not send the alert.
    Skip(SkipReason),
}

/// A per-candidate decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Candidate session.
    pub session_id: SessionId,
    /// What happens to it.
    pub outcome: Outcome,
}

/// An inbound ambulance alert being processed.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// Session that emitted the alert.
    pub emitter: SessionId,
    /// The alert frame as received, with `clientId` stamped.
    pub raw: Map<String, Value>,
    /// Emitter's position carried by the alert.
    pub origin: Option<Position>,
    /// The emitter supplied its own route in `raw`, relayed as sent.
    pub route_supplied: bool,
    /// Ignore the alert radius.
    pub bypass_proximity: bool,
}

/// Outcome of processing one alert event.
#[derive(Debug)]
pub struct AlertReport {
    /// Decision for every candidate, in evaluation order.
    pub decisions: Vec<Decision>,
    deliveries: Vec<JoinHandle<bool>>,
}

impl AlertReport {
    /// Number of candidates selected for delivery.
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d.outcome, Outcome::Dispatch { .. }))
            .count()
    }

    /// Number of candidates skipped for `reason`.
    #[must_use]
    pub fn skipped(&self, reason: SkipReason) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.outcome == Outcome::Skip(reason))
            .count()
    }

    /// Wait for every delivery to finish.
    ///
    /// Returns how many alerts were handed to a live session.
    pub async fn wait(self) -> usize {
        let mut delivered = 0;
        for handle in self.deliveries {
            match handle.await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Alert delivery task failed"),
            }
        }
        delivered
    }
}

/// Evaluates alert events and delivers enriched alerts.
#[derive(Clone)]
pub struct AlertEngine {
    config: AlertConfig,
    routes: RouteGenerator,
}

impl AlertEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(config: AlertConfig, routes: RouteGenerator) -> Self {
        Self { config, routes }
    }

    /// Decide, for every car other than the emitter, whether to alert it.
    ///
    /// The emitter is left out even when it identified as a car, so an
    /// ambulance console never alerts itself.
    #[must_use]
    pub fn evaluate(
        &self,
        emitter: &str,
        origin: Option<Position>,
        bypass: bool,
        registry: &Registry,
    ) -> Vec<Decision> {
        registry
            .all_by_role(Role::Car)
            .filter(|candidate| candidate.id != emitter)
            .map(|candidate| {
                let outcome = match (origin, candidate.position) {
                    (Some(from), Some(to)) => {
                        let distance_m = corrected_distance(from, to, self.config.correction_factor);
                        let in_proximity = distance_m <= self.config.radius_m;

                        if !candidate.alerts_enabled {
                            Outcome::Skip(SkipReason::AlertsDisabled)
                        } else if in_proximity || bypass {
                            Outcome::Dispatch { distance_m, target: to }
                        } else {
                            Outcome::Skip(SkipReason::OutOfRange)
                        }
                    }
                    _ => Outcome::Skip(SkipReason::MissingPosition),
                };

                match outcome {
                    Outcome::Dispatch { distance_m, .. } => trace!(
                        candidate = %candidate.id,
                        distance = distance_m.round(),
                        radius = self.config.radius_m,
                        bypass,
                        "Alert candidate selected"
                    ),
                    Outcome::Skip(reason) => trace!(
                        candidate = %candidate.id,
                        reason = %reason,
                        "Alert candidate skipped"
                    ),
                }

                Decision {
                    session_id: candidate.id,
                    outcome,
                }
            })
            .collect()
    }

    /// Evaluate an alert event and start delivery to every qualifying car.
    pub fn process(&self, event: AlertEvent, registry: &Registry, hub: &Arc<Hub>) -> AlertReport {
        let decisions = self.evaluate(
            &event.emitter,
            event.origin,
            event.bypass_proximity,
            registry,
        );

        let raw = Arc::new(event.raw);
        let deliveries = decisions
            .iter()
            .filter_map(|decision| match decision.outcome {
                Outcome::Dispatch { distance_m, target } => Some((decision, distance_m, target)),
                Outcome::Skip(_) => None,
            })
            .filter_map(|(decision, distance_m, target)| {
                // Dispatch only happens with a known origin.
                let origin = event.origin?;
                Some(self.deliver(
                    Arc::clone(&raw),
                    decision.session_id.clone(),
                    origin,
                    target,
                    distance_m,
                    event.route_supplied,
                    Arc::clone(hub),
                ))
            })
            .collect();

        debug!(
            emitter = %event.emitter,
            candidates = decisions.len(),
            "Alert evaluated"
        );

        AlertReport {
            decisions,
            deliveries,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn deliver(
        &self,
        raw: Arc<Map<String, Value>>,
        target_id: SessionId,
        origin: Position,
        target: Position,
        distance_m: f64,
        route_supplied: bool,
        hub: Arc<Hub>,
    ) -> JoinHandle<bool> {
        let routes = self.routes.clone();
        let fallback_points = self.config.fallback_points;

        tokio::spawn(async move {
            let route_geometry = if route_supplied {
                None
            } else {
                let lookup = tokio::spawn(async move { routes.generate(origin, target).await });
                Some(match lookup.await {
                    Ok(geometry) => geometry,
                    Err(e) => {
                        warn!(candidate = %target_id, error = %e, "Route generation failed");
                        RouteGeometry::polyline(simplified_route(origin, target, fallback_points))
                    }
                })
            };

            let enrichment = AlertEnrichment {
                distance: distance_m.round() as u64,
                priority: Priority::High,
                timestamp: now_millis(),
                route_geometry,
            };

            match codec::merge(&raw, &enrichment) {
                Ok(text) => {
                    let sent = hub.send_to(&target_id, Arc::from(text));
                    debug!(
                        candidate = %target_id,
                        distance = enrichment.distance,
                        bearing = initial_bearing_degrees(origin, target).round(),
                        sent,
                        "Ambulance alert dispatched"
                    );
                    sent
                }
                Err(e) => {
                    error!(candidate = %target_id, error = %e, "Failed to encode alert");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_M;
    use serde_json::json;

    const ORIGIN: Position = Position::new(51.5, -0.1);

    /// A point due north of `ORIGIN` at the given corrected distance.
    fn north_of_origin(corrected_m: f64) -> Position {
        let raw_m = corrected_m / DEFAULT_CORRECTION_FACTOR;
        let d_lat = (raw_m / EARTH_RADIUS_M).to_degrees();
        Position::new(ORIGIN.lat + d_lat, ORIGIN.lng)
    }

    fn engine() -> AlertEngine {
        AlertEngine::new(AlertConfig::default(), RouteGenerator::offline())
    }

    fn event(origin: Option<Position>, bypass: bool) -> AlertEvent {
        let mut raw = Map::new();
        raw.insert("type".into(), json!("ambulance_alert"));
        raw.insert("clientId".into(), json!("amb"));
        AlertEvent {
            emitter: "amb".into(),
            raw,
            origin,
            route_supplied: false,
            bypass_proximity: bypass,
        }
    }

    fn car(registry: &Registry, id: &str, position: Option<Position>, enabled: bool) {
        registry.register(id, Role::Car);
        if let Some(p) = position {
            registry.set_position(id, p);
        }
        registry.set_alert_opt_in(id, enabled);
    }

    fn outcome_of<'a>(decisions: &'a [Decision], id: &str) -> &'a Outcome {
        &decisions.iter().find(|d| d.session_id == id).unwrap().outcome
    }

    #[test]
    fn test_evaluate_reasons() {
        let registry = Registry::new();
        registry.register("amb", Role::Ambulance);
        car(&registry, "near", Some(north_of_origin(50.0)), true);
        car(&registry, "far", Some(north_of_origin(150.0)), true);
        car(&registry, "muted", Some(north_of_origin(10.0)), false);
        car(&registry, "lost", None, true);

        let decisions = engine().evaluate("amb", Some(ORIGIN), false, &registry);
        assert_eq!(decisions.len(), 4);

        match outcome_of(&decisions, "near") {
            Outcome::Dispatch { distance_m, .. } => assert_eq!(distance_m.round(), 50.0),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*outcome_of(&decisions, "far"), Outcome::Skip(SkipReason::OutOfRange));
        assert_eq!(*outcome_of(&decisions, "muted"), Outcome::Skip(SkipReason::AlertsDisabled));
        assert_eq!(*outcome_of(&decisions, "lost"), Outcome::Skip(SkipReason::MissingPosition));
    }

    #[test]
    fn test_radius_boundary_is_inclusive() {
        let registry = Registry::new();
        let edge = north_of_origin(100.0);
        car(&registry, "edge", Some(edge), true);
        let exact = corrected_distance(ORIGIN, edge, DEFAULT_CORRECTION_FACTOR);

        let at_edge = AlertEngine::new(
            AlertConfig {
                radius_m: exact,
                ..AlertConfig::default()
            },
            RouteGenerator::offline(),
        );
        let decisions = at_edge.evaluate("amb", Some(ORIGIN), false, &registry);
        assert!(matches!(decisions[0].outcome, Outcome::Dispatch { .. }));

        let just_inside = AlertEngine::new(
            AlertConfig {
                radius_m: exact - 1e-6,
                ..AlertConfig::default()
            },
            RouteGenerator::offline(),
        );
        let decisions = just_inside.evaluate("amb", Some(ORIGIN), false, &registry);
        assert_eq!(decisions[0].outcome, Outcome::Skip(SkipReason::OutOfRange));
    }

    #[test]
    fn test_bypass_ignores_radius_only() {
        let registry = Registry::new();
        car(&registry, "far", Some(north_of_origin(5_000.0)), true);
        car(&registry, "muted", Some(north_of_origin(5_000.0)), false);
        car(&registry, "lost", None, true);

        let decisions = engine().evaluate("amb", Some(ORIGIN), true, &registry);
        assert!(matches!(outcome_of(&decisions, "far"), Outcome::Dispatch { .. }));
        assert_eq!(*outcome_of(&decisions, "muted"), Outcome::Skip(SkipReason::AlertsDisabled));
        assert_eq!(*outcome_of(&decisions, "lost"), Outcome::Skip(SkipReason::MissingPosition));
    }

    #[test]
    fn test_emitter_without_position_skips_everyone() {
        let registry = Registry::new();
        car(&registry, "near", Some(ORIGIN), true);

        let decisions = engine().evaluate("amb", None, true, &registry);
        assert_eq!(decisions[0].outcome, Outcome::Skip(SkipReason::MissingPosition));
    }

    #[test]
    fn test_emitter_is_not_a_candidate() {
        let registry = Registry::new();
        car(&registry, "amb", Some(ORIGIN), true);

        assert!(engine().evaluate("amb", Some(ORIGIN), false, &registry).is_empty());
    }

    #[test]
    fn test_custom_radius_and_factor() {
        let registry = Registry::new();
        car(&registry, "c", Some(north_of_origin(150.0)), true);

        let config = AlertConfig {
            radius_m: 200.0,
            ..AlertConfig::default()
        };
        let wide = AlertEngine::new(config, RouteGenerator::offline());
        assert!(matches!(
            wide.evaluate("amb", Some(ORIGIN), false, &registry)[0].outcome,
            Outcome::Dispatch { .. }
        ));

        let config = AlertConfig {
            correction_factor: 1.0,
            ..AlertConfig::default()
        };
        let uncorrected = AlertEngine::new(config, RouteGenerator::offline());
        match uncorrected.evaluate("amb", Some(ORIGIN), true, &registry)[0].outcome {
            Outcome::Dispatch { distance_m, .. } => assert_eq!(distance_m.round(), 375.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_process_delivers_enriched_alert() {
        let registry = Registry::new();
        let hub = Arc::new(Hub::new());
        car(&registry, "near", Some(north_of_origin(50.0)), true);
        car(&registry, "far", Some(north_of_origin(150.0)), true);
        let mut near_rx = hub.attach("near");
        let mut far_rx = hub.attach("far");

        let report = engine().process(event(Some(ORIGIN), false), &registry, &hub);
        assert_eq!(report.dispatched(), 1);
        assert_eq!(report.skipped(SkipReason::OutOfRange), 1);
        assert_eq!(report.wait().await, 1);

        let alert: Value = serde_json::from_str(&near_rx.try_recv().unwrap()).unwrap();
        assert_eq!(alert["type"], "ambulance_alert");
        assert_eq!(alert["clientId"], "amb");
        assert_eq!(alert["distance"], 50);
        assert_eq!(alert["priority"], "high");
        assert!(alert["timestamp"].as_u64().unwrap() > 0);
        assert_eq!(alert["routeGeometry"]["type"], "polyline");
        assert_eq!(
            alert["routeGeometry"]["data"],
            simplified_route(ORIGIN, north_of_origin(50.0), 5)
        );

        assert!(near_rx.try_recv().is_err());
        assert!(far_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_process_keeps_supplied_geometry() {
        let registry = Registry::new();
        let hub = Arc::new(Hub::new());
        car(&registry, "near", Some(north_of_origin(20.0)), true);
        let mut rx = hub.attach("near");

        let supplied = json!({"type": "geojson", "data": r#"{"type":"LineString"}"#, "color": "#d00"});
        let mut alert = event(Some(ORIGIN), false);
        alert.raw.insert("routeGeometry".into(), supplied.clone());
        alert.route_supplied = true;

        let report = engine().process(alert, &registry, &hub);
        assert_eq!(report.wait().await, 1);

        let alert: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(alert["routeGeometry"], supplied);
        assert_eq!(alert["distance"], 20);
    }

    /// Route provider whose behavior depends on the destination.
    struct UnevenProvider {
        panics_for: Position,
        stalls_for: Position,
    }

    #[async_trait::async_trait]
    impl crate::route::RouteProvider for UnevenProvider {
        async fn route(&self, _start: Position, end: Position) -> Result<String, crate::route::RouteError> {
            if end == self.panics_for {
                panic!("route provider crashed");
            }
            if end == self.stalls_for {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
            Ok("xyz".to_string())
        }

        fn name(&self) -> &'static str {
            "uneven"
        }
    }

    async fn next_alert(rx: &mut crate::hub::OutboundReceiver) -> Value {
        let text = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("alert was not delivered")
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_route_failures_stay_per_candidate() {
        use std::time::Duration;

        let crashing = north_of_origin(10.0);
        let stalled = north_of_origin(20.0);
        let healthy = north_of_origin(30.0);

        let registry = Registry::new();
        let hub = Arc::new(Hub::new());
        car(&registry, "crashing", Some(crashing), true);
        car(&registry, "stalled", Some(stalled), true);
        car(&registry, "healthy", Some(healthy), true);
        let mut crashing_rx = hub.attach("crashing");
        let mut stalled_rx = hub.attach("stalled");
        let mut healthy_rx = hub.attach("healthy");

        let provider = Arc::new(UnevenProvider {
            panics_for: crashing,
            stalls_for: stalled,
        });
        let engine = AlertEngine::new(
            AlertConfig::default(),
            RouteGenerator::new(provider, Duration::from_secs(60)),
        );

        let report = engine.process(event(Some(ORIGIN), false), &registry, &hub);
        assert_eq!(report.dispatched(), 3);

        let alert = next_alert(&mut healthy_rx).await;
        assert_eq!(alert["routeGeometry"]["data"], "xyz");

        // A crashed lookup falls back to the straight line with 8 inner points.
        let alert = next_alert(&mut crashing_rx).await;
        let data = alert["routeGeometry"]["data"].as_str().unwrap();
        assert_eq!(crate::polyline::decode(data).unwrap().len(), 10);
        assert_eq!(data, simplified_route(ORIGIN, crashing, DEFAULT_FALLBACK_POINTS));

        // The stalled lookup is still pending and held nobody else up.
        assert!(stalled_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_detached_candidate_is_not_counted() {
        let registry = Registry::new();
        let hub = Arc::new(Hub::new());
        car(&registry, "ghost", Some(ORIGIN), true);

        let report = engine().process(event(Some(ORIGIN), false), &registry, &hub);
        assert_eq!(report.dispatched(), 1);
        assert_eq!(report.wait().await, 0);
    }
}
