//! Shared error types used across msfs crates.

use thiserror::Error;

/// Errors produced while validating or manipulating object keys and
/// mount-namespace name components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A name component was empty.
    #[error("Name component is empty")]
    Empty,

    /// A name component contained a path separator.
    #[error("Name component contains '/': {component}")]
    ContainsSeparator {
        /// The offending component.
        component: String,
    },

    /// A name component was one of the reserved dot entries.
    #[error("Name component is reserved: {component}")]
    Reserved {
        /// The offending component.
        component: String,
    },

    /// A name component contained an interior NUL byte.
    #[error("Name component contains a NUL byte")]
    ContainsNul,
}
