//! Error types for the fulfillment engine

use crate::types::OrderStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for fulfillment operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fulfillment errors
#[derive(Error, Debug)]
pub enum Error {
    /// Listing is not available for purchase
    #[error("Product unavailable: {0}")]
    ProductUnavailable(Uuid),

    /// Buyer's available balance below the order amount
    #[error("Insufficient funds for {user_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Payer
        user_id: String,
        /// Amount requested
        requested: Decimal,
        /// Available balance at check time
        available: Decimal,
    },

    /// Caller is not allowed to perform this operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Operation not valid from the order's current status
    #[error("{operation} not allowed from {from:?}")]
    InvalidTransition {
        /// Status the order was in
        from: OrderStatus,
        /// Attempted operation
        operation: &'static str,
    },

    /// Dispute raised after the window closed
    #[error("Dispute window expired at {0}")]
    DisputeWindowExpired(DateTime<Utc>),

    /// Resolution attempted on an order that is not disputed
    #[error("Order not disputed: {0}")]
    NotDisputed(Uuid),

    /// Resolution retried with a different outcome
    #[error("Dispute already resolved for order {0}")]
    AlreadyResolved(Uuid),

    /// Order is not part of a dispatched route batch
    #[error("Order not routed: {0}")]
    NotRouted(Uuid),

    /// Optimistic-lock contention on a reservation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Payment provider declined
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// Reservation not found
    #[error("Reservation not found for product: {0}")]
    ReservationNotFound(Uuid),

    /// Batch not found
    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    /// Route not found
    #[error("Route not found: {0}")]
    RouteNotFound(Uuid),

    /// Batch lifecycle violation
    #[error("Batch error: {0}")]
    Batch(String),

    /// Route planning error
    #[error("Routing error: {0}")]
    Routing(#[from] routing_engine::Error),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(ledger_core::Error),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (task or channel failure)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        // Surface the wallet shortfall under the fulfillment taxonomy;
        // everything else stays a ledger error
        match err {
            ledger_core::Error::InsufficientFunds {
                user_id,
                requested,
                available,
            } => Error::InsufficientFunds {
                user_id,
                requested,
                available,
            },
            other => Error::Ledger(other),
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
