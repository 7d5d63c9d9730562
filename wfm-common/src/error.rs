//! Common error types for the Geo Toolkit

use thiserror::Error;

/// Common result type for Geo Toolkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the toolkit crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write would violate a uniqueness or tree constraint
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::nested_set::NestedSetError> for Error {
    fn from(err: crate::nested_set::NestedSetError) -> Self {
        Error::Conflict(err.to_string())
    }
}

impl From<crate::ip_range::IpRangeError> for Error {
    fn from(err: crate::ip_range::IpRangeError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}
