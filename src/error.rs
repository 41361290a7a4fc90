//! Error types for the Gatehouse service.

use thiserror::Error;

/// Main error type for Gatehouse operations.
///
/// The admission gate itself is total and never fails; errors only arise at
/// the service edges (configuration parsing, socket binding).
#[derive(Error, Debug)]
pub enum GatehouseError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatehouse operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;
