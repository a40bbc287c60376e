//! Error types for the route engine

use thiserror::Error;
use uuid::Uuid;

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Routing errors
#[derive(Error, Debug)]
pub enum Error {
    /// No stops to plan
    #[error("No stops to plan")]
    EmptyInput,

    /// An order is missing its pickup or delivery counterpart
    #[error("Unpaired stop for order {0}: every pickup needs exactly one delivery")]
    UnpairedStop(Uuid),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}
