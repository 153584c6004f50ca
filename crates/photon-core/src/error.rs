//! Error types shared across the renderer.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Out of bounds access
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Math operation outside its domain (e.g. inverting a singular matrix)
    #[error("Domain error: {0}")]
    Domain(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
