//! Error types for quantity parsing.

use thiserror::Error;

/// Errors that can occur when parsing resource quantities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitError {
    /// The quantity string is empty.
    #[error("quantity cannot be empty")]
    Empty,

    /// The CPU quantity could not be parsed.
    #[error("could not parse cores value from {0:?}")]
    InvalidCores(String),

    /// The memory quantity could not be parsed.
    #[error("could not parse bytes value from {0:?}")]
    InvalidBytes(String),
}
