//! Error types for the wallet ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Available balance below the requested amount
    #[error("Insufficient funds for {user_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Payer
        user_id: String,
        /// Amount requested
        requested: Decimal,
        /// Available balance at check time
        available: Decimal,
    },

    /// Hold not found
    #[error("Hold not found: {0}")]
    HoldNotFound(String),

    /// Hold already left the `Held` state
    #[error("Hold already settled: {0}")]
    HoldAlreadySettled(String),

    /// Entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Rejected amount (zero or negative)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Invariant violation (conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
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
