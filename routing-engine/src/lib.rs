//! Mercato Route Engine
//!
//! Pickup/delivery route planning for same-day marketplace orders.
//!
//! # Algorithm
//!
//! 1. Cluster paired pickup/delivery stops onto vehicles under a
//!    stops-per-route cap
//! 2. Build an initial tour per vehicle with nearest-neighbor insertion
//!    that never places a delivery before its pickup
//! 3. Improve each tour with bounded 2-opt and or-opt passes; only
//!    precedence-preserving moves are accepted
//!
//! This is a heuristic, not an optimal solver: the improvement phase runs
//! a fixed iteration budget and stops, so route quality is bounded-effort,
//! not guaranteed-minimal. Stops whose time windows cannot be met are kept
//! and the route is flagged infeasible rather than failing the batch.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod optimizer;
pub mod types;

pub use error::{Error, Result};
pub use optimizer::RouteOptimizer;
pub use types::{
    Location, OptimizerConfig, Route, RouteStop, Stop, StopKind, TimeWindow,
};
