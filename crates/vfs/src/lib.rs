//! Read-cache and prefetch core of the msfs filesystem.
//!
//! msfs exposes object-storage backends as a single read-only POSIX
//! filesystem. This crate is the core that sits between the user-space
//! filesystem request handlers and the backends:
//!
//! ```text
//! Layer 3: FUSE adapter (fuser::Filesystem impl, feature "fuse")
//! Layer 2: Request handlers (lookup, getattr, readdir, open, read)
//! Layer 1: Primitives (backend registry, inode table, cache-line engine)
//! ```
//!
//! Object content is cached in fixed-size lines indexed by
//! `(inode, line_number)`, with at most one in-flight fetch per line, a
//! global clean-line LRU under a fixed slot budget, and optional sequential
//! prefetch. Backends can be added and removed at runtime without
//! unmounting; see [`Core::reload`].

mod cache;
mod core;
mod error;
mod handlers;
mod inode;
mod options;
mod registry;
mod reload;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use crate::core::{Core, CoreStats, LineKey};
pub use error::FsError;
pub use handlers::{DirEntry, FsStatvfs};
pub use inode::{InodeAttrs, InodeKind};
pub use options::{BackendSpec, CacheOptions, DriverSpec, MountConfig};
pub use registry::BackendId;
pub use reload::ReloadSummary;
