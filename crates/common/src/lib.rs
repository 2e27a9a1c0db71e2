//! Shared types and utilities for msfs.
//!
//! This crate provides common functionality used across all msfs crates:
//! - Object-key path utilities
//! - ETag normalization
//! - Shared constants and error types

pub mod constants;
pub mod error;
pub mod key_utils;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::KeyError;
pub use key_utils::{join_key, trim_etag, validate_dir_name, validate_name_component};
