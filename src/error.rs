//! Error types for the Tally service.

use thiserror::Error;

/// Main error type for Tally operations.
///
/// A rate limit denial is not an error; it is reported through
/// [`Decision`](crate::ratelimit::Decision).
#[derive(Error, Debug)]
pub enum TallyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy name that is not present in the policy table
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;
