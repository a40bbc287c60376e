//! Pickup/delivery route optimizer
//!
//! Construct-then-improve heuristic:
//!
//! 1. Cluster order pairs onto vehicles under the stops-per-route cap
//! 2. Nearest-neighbor tour per vehicle; a delivery only becomes
//!    eligible once its pickup is placed
//! 3. Bounded 2-opt / or-opt improvement; a move is accepted only if it
//!    shortens the tour, preserves pickup-before-delivery, and does not
//!    add time-window violations
//!
//! Distance ties are broken by earliest time-window deadline. Routes with
//! unmeetable windows are flagged `infeasible` instead of being dropped,
//! so one bad window never blocks the rest of the batch.

use crate::types::{OptimizerConfig, Route, RouteStop, Stop, StopKind, TimeWindow};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Distance comparisons closer than this are treated as ties
const DISTANCE_EPSILON_KM: f64 = 1e-9;

/// A pickup/delivery pair for one order
#[derive(Debug, Clone)]
struct OrderPair {
    order_id: Uuid,
    pickup: Stop,
    delivery: Stop,
}

impl OrderPair {
    /// Deadline used for seeding and tie-breaks: the tighter of the two
    /// stop deadlines
    fn deadline(&self) -> Option<DateTime<Utc>> {
        match (self.pickup.deadline(), self.delivery.deadline()) {
            (Some(p), Some(d)) => Some(p.min(d)),
            (Some(p), None) => Some(p),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        }
    }
}

/// Route optimizer
pub struct RouteOptimizer {
    config: OptimizerConfig,
}

impl RouteOptimizer {
    /// Create a new optimizer
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        if config.max_stops_per_route < 2 {
            return Err(Error::Config(
                "max_stops_per_route must fit at least one pickup/delivery pair".to_string(),
            ));
        }
        if config.avg_speed_kmh <= 0.0 {
            return Err(Error::Config("avg_speed_kmh must be positive".to_string()));
        }

        Ok(Self { config })
    }

    /// Optimizer with default settings
    pub fn with_defaults() -> Self {
        Self {
            config: OptimizerConfig::default(),
        }
    }

    /// Plan routes over a set of paired stops
    ///
    /// `depart_at` anchors ETA computation: drivers are assumed to reach
    /// their first stop no earlier than this instant.
    pub fn plan(&self, stops: Vec<Stop>, depart_at: DateTime<Utc>) -> Result<Vec<Route>> {
        if stops.is_empty() {
            return Err(Error::EmptyInput);
        }

        let pairs = Self::pair_stops(stops)?;
        let groups = self.cluster(pairs);

        let mut routes = Vec::with_capacity(groups.len());
        for group in groups {
            let route = self.plan_group(&group, depart_at);

            tracing::info!(
                route_id = %route.route_id,
                stops = route.stops.len(),
                distance_km = route.total_distance_km,
                infeasible = route.infeasible,
                "Route planned"
            );

            routes.push(route);
        }

        Ok(routes)
    }

    /// Group stops by order and require exactly one pickup and one
    /// delivery per order
    fn pair_stops(stops: Vec<Stop>) -> Result<Vec<OrderPair>> {
        let mut by_order: HashMap<Uuid, (Option<Stop>, Option<Stop>)> = HashMap::new();

        for stop in stops {
            let slot = by_order.entry(stop.order_id).or_insert((None, None));
            let side = match stop.kind {
                StopKind::Pickup => &mut slot.0,
                StopKind::Delivery => &mut slot.1,
            };
            if side.is_some() {
                return Err(Error::UnpairedStop(stop.order_id));
            }
            *side = Some(stop);
        }

        let mut pairs = Vec::with_capacity(by_order.len());
        for (order_id, (pickup, delivery)) in by_order {
            match (pickup, delivery) {
                (Some(pickup), Some(delivery)) => pairs.push(OrderPair {
                    order_id,
                    pickup,
                    delivery,
                }),
                _ => return Err(Error::UnpairedStop(order_id)),
            }
        }

        // Deterministic output regardless of hash order
        pairs.sort_by_key(|p| p.order_id);
        Ok(pairs)
    }

    /// Assign order pairs to vehicles: seed each vehicle with the most
    /// deadline-pressed unassigned order, then fill with its nearest
    /// neighbors by pickup location
    fn cluster(&self, mut pairs: Vec<OrderPair>) -> Vec<Vec<OrderPair>> {
        let capacity = (self.config.max_stops_per_route / 2).max(1);
        let mut groups = Vec::new();

        while !pairs.is_empty() {
            let seed_idx = Self::earliest_deadline_index(&pairs);
            let seed = pairs.swap_remove(seed_idx);
            let anchor = seed.pickup.location;

            let mut group = vec![seed];
            while group.len() < capacity && !pairs.is_empty() {
                let next_idx = Self::nearest_pickup_index(&pairs, &anchor);
                group.push(pairs.swap_remove(next_idx));
            }

            groups.push(group);
        }

        groups
    }

    fn earliest_deadline_index(pairs: &[OrderPair]) -> usize {
        let mut best = 0;
        for i in 1..pairs.len() {
            let earlier = match (pairs[i].deadline(), pairs[best].deadline()) {
                (Some(a), Some(b)) => a < b,
                (Some(_), None) => true,
                _ => false,
            };
            if earlier {
                best = i;
            }
        }
        best
    }

    fn nearest_pickup_index(pairs: &[OrderPair], anchor: &crate::types::Location) -> usize {
        let mut best = 0;
        let mut best_dist = anchor.distance_km(&pairs[0].pickup.location);

        for (i, pair) in pairs.iter().enumerate().skip(1) {
            let dist = anchor.distance_km(&pair.pickup.location);
            if dist + DISTANCE_EPSILON_KM < best_dist {
                best = i;
                best_dist = dist;
            } else if (dist - best_dist).abs() <= DISTANCE_EPSILON_KM
                && Self::deadline_before(pair.deadline(), pairs[best].deadline())
            {
                best = i;
            }
        }

        best
    }

    fn deadline_before(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Plan one vehicle's route
    fn plan_group(&self, group: &[OrderPair], depart_at: DateTime<Utc>) -> Route {
        // Flatten to a stop arena; pickup of order k at 2k, delivery at 2k+1
        let mut stops = Vec::with_capacity(group.len() * 2);
        for pair in group {
            stops.push(pair.pickup.clone());
            stops.push(pair.delivery.clone());
        }

        let mut tour = self.nearest_neighbor_tour(&stops);
        self.improve_tour(&mut tour, &stops, depart_at);

        self.build_route(&tour, &stops, depart_at)
    }

    /// Nearest-neighbor construction: a delivery becomes eligible once
    /// its pickup is placed
    fn nearest_neighbor_tour(&self, stops: &[Stop]) -> Vec<usize> {
        let n = stops.len();
        let mut tour = Vec::with_capacity(n);
        let mut placed = vec![false; n];
        let mut current: Option<usize> = None;

        while tour.len() < n {
            let mut best: Option<(usize, f64)> = None;

            for (i, stop) in stops.iter().enumerate() {
                if placed[i] || !Self::eligible(i, stop, &placed) {
                    continue;
                }

                let dist = match current {
                    Some(c) => stops[c].location.distance_km(&stop.location),
                    // First stop: no travel yet, rank by deadline alone
                    None => 0.0,
                };

                let better = match best {
                    None => true,
                    Some((b, best_dist)) => {
                        dist + DISTANCE_EPSILON_KM < best_dist
                            || ((dist - best_dist).abs() <= DISTANCE_EPSILON_KM
                                && Self::deadline_before(
                                    stops[i].deadline(),
                                    stops[b].deadline(),
                                ))
                    }
                };
                if better {
                    best = Some((i, dist));
                }
            }

            let (next, _) = best.expect("eligible stop always exists while tour is incomplete");
            placed[next] = true;
            tour.push(next);
            current = Some(next);
        }

        tour
    }

    /// A pickup is always eligible; a delivery only after its pickup
    fn eligible(index: usize, stop: &Stop, placed: &[bool]) -> bool {
        match stop.kind {
            StopKind::Pickup => true,
            // Arena layout: delivery at 2k+1 follows pickup at 2k
            StopKind::Delivery => placed[index - 1],
        }
    }

    /// Bounded local search: 2-opt segment reversals and or-opt single
    /// stop relocations, first-improvement, fixed candidate budget
    fn improve_tour(&self, tour: &mut Vec<usize>, stops: &[Stop], depart_at: DateTime<Utc>) {
        let n = tour.len();
        if n < 4 {
            return;
        }

        let mut budget = self.config.improvement_iterations;
        let mut best_dist = Self::tour_distance(tour, stops);
        let mut best_violations = self.window_violations(tour, stops, depart_at);
        let mut improved = true;

        while improved && budget > 0 {
            improved = false;

            // 2-opt: reverse tour[i..=j]
            'outer: for i in 0..n - 1 {
                for j in i + 1..n {
                    if budget == 0 {
                        break 'outer;
                    }
                    budget -= 1;

                    tour[i..=j].reverse();

                    if self.accepts(tour, stops, depart_at, best_dist, best_violations) {
                        best_dist = Self::tour_distance(tour, stops);
                        best_violations = self.window_violations(tour, stops, depart_at);
                        improved = true;
                    } else {
                        tour[i..=j].reverse(); // undo
                    }
                }
            }

            // or-opt: relocate a single stop
            'outer2: for from in 0..n {
                for to in 0..n {
                    if from == to {
                        continue;
                    }
                    if budget == 0 {
                        break 'outer2;
                    }
                    budget -= 1;

                    let stop = tour.remove(from);
                    tour.insert(to, stop);

                    if self.accepts(tour, stops, depart_at, best_dist, best_violations) {
                        best_dist = Self::tour_distance(tour, stops);
                        best_violations = self.window_violations(tour, stops, depart_at);
                        improved = true;
                    } else {
                        let stop = tour.remove(to);
                        tour.insert(from, stop);
                    }
                }
            }
        }

        tracing::debug!(
            remaining_budget = budget,
            distance_km = best_dist,
            violations = best_violations,
            "Improvement finished"
        );
    }

    fn accepts(
        &self,
        tour: &[usize],
        stops: &[Stop],
        depart_at: DateTime<Utc>,
        best_dist: f64,
        best_violations: usize,
    ) -> bool {
        Self::precedence_ok(tour, stops)
            && Self::tour_distance(tour, stops) + DISTANCE_EPSILON_KM < best_dist
            && self.window_violations(tour, stops, depart_at) <= best_violations
    }

    /// Pickup-before-delivery over the arena layout (delivery 2k+1 pairs
    /// with pickup 2k)
    fn precedence_ok(tour: &[usize], stops: &[Stop]) -> bool {
        let mut position = vec![0usize; stops.len()];
        for (pos, &idx) in tour.iter().enumerate() {
            position[idx] = pos;
        }

        tour.iter().all(|&idx| match stops[idx].kind {
            StopKind::Pickup => true,
            StopKind::Delivery => position[idx - 1] < position[idx],
        })
    }

    fn tour_distance(tour: &[usize], stops: &[Stop]) -> f64 {
        tour.windows(2)
            .map(|w| stops[w[0]].location.distance_km(&stops[w[1]].location))
            .sum()
    }

    /// Number of stops whose deadline is missed under the ETA model
    fn window_violations(&self, tour: &[usize], stops: &[Stop], depart_at: DateTime<Utc>) -> usize {
        self.walk_etas(tour, stops, depart_at)
            .into_iter()
            .zip(tour.iter())
            .filter(|(eta, &idx)| {
                stops[idx]
                    .time_window
                    .map(|w| !w.met_by(*eta))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Compute arrival times along the tour: travel at the configured
    /// speed, wait out early arrivals, spend service time at each stop
    fn walk_etas(&self, tour: &[usize], stops: &[Stop], depart_at: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut etas = Vec::with_capacity(tour.len());
        let mut clock = depart_at;
        let mut prev: Option<usize> = None;

        for &idx in tour {
            if let Some(p) = prev {
                let dist = stops[p].location.distance_km(&stops[idx].location);
                clock += self.config.travel_time(dist);
            }

            let arrival = match stops[idx].time_window {
                Some(TimeWindow { earliest, .. }) if clock < earliest => earliest,
                _ => clock,
            };

            etas.push(arrival);
            clock = arrival + chrono::Duration::seconds(self.config.service_time_secs as i64);
            prev = Some(idx);
        }

        etas
    }

    /// Materialize a tour into a Route with ETAs and totals
    fn build_route(&self, tour: &[usize], stops: &[Stop], depart_at: DateTime<Utc>) -> Route {
        let etas = self.walk_etas(tour, stops, depart_at);

        let mut infeasible = false;
        let route_stops: Vec<RouteStop> = tour
            .iter()
            .zip(etas.iter())
            .map(|(&idx, &eta)| {
                let stop = &stops[idx];
                if let Some(w) = stop.time_window {
                    if !w.met_by(eta) {
                        infeasible = true;
                    }
                }
                RouteStop {
                    order_id: stop.order_id,
                    kind: stop.kind,
                    location: stop.location,
                    eta,
                    time_window: stop.time_window,
                    completed: false,
                }
            })
            .collect();

        let total_distance_km = Self::tour_distance(tour, stops);
        let total_duration_secs = match (etas.first(), etas.last()) {
            (Some(first), Some(last)) => {
                let end = *last + chrono::Duration::seconds(self.config.service_time_secs as i64);
                (end - *first).num_seconds().max(0) as u64
            }
            _ => 0,
        };

        if infeasible {
            tracing::warn!(
                stops = route_stops.len(),
                "Route has unmeetable time windows, flagged infeasible"
            );
        }

        Route {
            route_id: Uuid::new_v4(),
            driver_id: None,
            stops: route_stops,
            total_distance_km,
            total_duration_secs,
            infeasible,
        }
    }
}
