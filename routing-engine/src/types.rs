//! Core types for route planning

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mean Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl Location {
    /// Create a new location
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to another location (haversine)
    pub fn distance_km(&self, other: &Location) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Delivery or pickup time window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Earliest acceptable arrival
    pub earliest: DateTime<Utc>,
    /// Latest acceptable arrival (the deadline)
    pub latest: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a new window
    pub fn new(earliest: DateTime<Utc>, latest: DateTime<Utc>) -> Self {
        Self { earliest, latest }
    }

    /// Whether an arrival time satisfies the window (waiting is allowed,
    /// so only the deadline can be violated)
    pub fn met_by(&self, arrival: DateTime<Utc>) -> bool {
        arrival <= self.latest
    }
}

/// Stop kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StopKind {
    /// Collect the item at the seller's location
    Pickup = 1,
    /// Hand the item to the buyer
    Delivery = 2,
}

/// A planned visit, input to the optimizer
///
/// Stops come in pickup/delivery pairs sharing an `order_id`; the pickup
/// must precede its delivery in any produced route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    /// Order this stop belongs to
    pub order_id: Uuid,

    /// Pickup or delivery
    pub kind: StopKind,

    /// Where the stop is
    pub location: Location,

    /// Optional time window constraint
    pub time_window: Option<TimeWindow>,
}

impl Stop {
    /// Pickup stop for an order
    pub fn pickup(order_id: Uuid, location: Location, time_window: Option<TimeWindow>) -> Self {
        Self {
            order_id,
            kind: StopKind::Pickup,
            location,
            time_window,
        }
    }

    /// Delivery stop for an order
    pub fn delivery(order_id: Uuid, location: Location, time_window: Option<TimeWindow>) -> Self {
        Self {
            order_id,
            kind: StopKind::Delivery,
            location,
            time_window,
        }
    }

    /// Deadline used for tie-breaking (no window sorts last)
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.time_window.map(|w| w.latest)
    }
}

/// A stop placed on a route, with its computed ETA
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    /// Order this stop belongs to
    pub order_id: Uuid,

    /// Pickup or delivery
    pub kind: StopKind,

    /// Where the stop is
    pub location: Location,

    /// Estimated arrival
    pub eta: DateTime<Utc>,

    /// Window the stop was planned against
    pub time_window: Option<TimeWindow>,

    /// Marked by the driver once the stop is done
    pub completed: bool,
}

/// An ordered route for one vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Unique route ID
    pub route_id: Uuid,

    /// Assigned driver (null until dispatch)
    pub driver_id: Option<String>,

    /// Ordered stop sequence
    pub stops: Vec<RouteStop>,

    /// Total travel distance in kilometers
    pub total_distance_km: f64,

    /// Total duration including service time, in seconds
    pub total_duration_secs: u64,

    /// Set when at least one time window could not be met; the route is
    /// still usable as a best-effort plan
    pub infeasible: bool,
}

impl Route {
    /// Position of a stop for an order, if present
    pub fn position_of(&self, order_id: Uuid, kind: StopKind) -> Option<usize> {
        self.stops
            .iter()
            .position(|s| s.order_id == order_id && s.kind == kind)
    }

    /// Whether every delivery comes after its pickup
    pub fn precedence_holds(&self) -> bool {
        self.stops.iter().enumerate().all(|(i, stop)| {
            stop.kind != StopKind::Delivery
                || self
                    .position_of(stop.order_id, StopKind::Pickup)
                    .map(|p| p < i)
                    .unwrap_or(false)
        })
    }
}

/// Route optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum stops on one route (pairs are never split)
    pub max_stops_per_route: usize,

    /// Assumed average travel speed
    pub avg_speed_kmh: f64,

    /// Handling time spent at each stop, in seconds
    pub service_time_secs: u64,

    /// Improvement pass budget (2-opt + or-opt attempts)
    pub improvement_iterations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_stops_per_route: 16,
            avg_speed_kmh: 30.0,
            service_time_secs: 240,
            improvement_iterations: 400,
        }
    }
}

impl OptimizerConfig {
    /// Travel time over a distance at the configured speed
    pub fn travel_time(&self, distance_km: f64) -> Duration {
        let secs = distance_km / self.avg_speed_kmh * 3600.0;
        Duration::seconds(secs.round() as i64)
    }
}
