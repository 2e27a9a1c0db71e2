//! Object-storage backend drivers for msfs.
//!
//! This crate provides the narrow `BackendDriver` capability the cache core
//! depends on, together with its two production implementations:
//!
//! - **S3 driver** - any S3-compatible endpoint via the AWS SDK for Rust
//! - **AIStore driver** - NVIDIA AIStore clusters via their HTTP API
//!
//! Drivers own retries and authentication; the core only ever calls the four
//! capability operations (`stat_file`, `stat_directory`, `list_directory`,
//! `read_file`). `If-Match` preconditions that the server does not honor are
//! emulated with a HEAD-then-GET comparison, which is non-atomic but surfaces
//! the same `Stale` signal.

mod aistore;
mod error;
mod retry;
mod s3;
mod traits;
mod types;

pub use aistore::{AisDriver, AisOptions};
pub use error::DriverError;
pub use retry::RetrySettings;
pub use s3::{S3Driver, S3Options};
pub use traits::BackendDriver;
pub use types::{DirPage, FileStat, ListedFile, ReadChunk};
