//! Error types for backend driver operations.

use thiserror::Error;

/// Errors that can occur during backend driver operations.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Object or prefix not found.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// An `If-Match` precondition failed, either server-side or via the
    /// driver's HEAD-then-GET emulation.
    #[error("ETag precondition failed for {key}")]
    Stale { key: String },

    /// Access denied.
    #[error("Access denied to {key}: {message}")]
    AccessDenied { key: String, message: String },

    /// Transport, protocol, or 5xx error.
    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    /// Invalid driver configuration (bad endpoint, unreadable token file).
    #[error("Invalid backend configuration: {message}")]
    InvalidConfig { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl DriverError {
    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::Network { retryable, .. } => *retryable,
            DriverError::NotFound { .. } => false,
            DriverError::Stale { .. } => false,
            DriverError::AccessDenied { .. } => false,
            DriverError::InvalidConfig { .. } => false,
            DriverError::Other { .. } => false,
        }
    }
}
