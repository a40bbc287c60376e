//! Mercato Fulfillment Engine
//!
//! Moves a marketplace purchase through an escrow-backed lifecycle and
//! batches confirmed orders into twice-daily delivery routes.
//!
//! # Architecture
//!
//! 1. **Checkout**: reserve the listing, place the wallet escrow hold,
//!    emit the order in `Pending`
//! 2. **Confirmation**: seller accepts; the order becomes eligible for
//!    the next delivery checkpoint
//! 3. **Routing**: the 13:00/19:00 checkpoints batch confirmed orders and
//!    hand paired pickup/delivery stops to the route engine
//! 4. **Delivery**: the buyer confirms receipt, which opens a time-boxed
//!    dispute window; a sweep auto-releases the escrow when it lapses
//! 5. **Disputes**: an operator resolves to refund or release, exactly
//!    once
//!
//! # Concurrency
//!
//! All transitions for one order run under a per-order serialization
//! point; reservations use a versioned compare-and-set keyed by product.
//! Different orders and products proceed fully in parallel.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod batch;
pub mod config;
pub mod dispute;
pub mod engine;
pub mod error;
pub mod machine;
pub mod notify;
pub mod payment;
pub mod reservation;
pub mod scheduler;
pub mod storage;
pub mod sweep;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::FulfillmentEngine;
pub use error::{Error, Result};
pub use types::{
    BatchStatus, DisputeOutcome, Order, OrderStatus, PaymentMethod, Reservation,
    ReservationStatus, RouteBatch, TimeSlot,
};
