//! Error types for the filesystem core.

use thiserror::Error;

use msfs_common::KeyError;
use msfs_storage::DriverError;

/// Errors surfaced by the filesystem core.
///
/// Each kind has a single canonical POSIX mapping, returned by
/// [`errno`](Self::errno); the FUSE adapter replies with that value verbatim.
#[derive(Debug, Error, Clone)]
pub enum FsError {
    /// Path does not resolve.
    #[error("Not found")]
    NotFound,

    /// A parent component is a file.
    #[error("Not a directory")]
    NotADirectory,

    /// Open attempted on a directory.
    #[error("Is a directory")]
    NotAFile,

    /// Write-side operation on a read-only filesystem.
    #[error("Read-only filesystem")]
    ReadOnly,

    /// ETag precondition failed or the object changed under an open handle.
    #[error("Stale handle")]
    Stale,

    /// Driver context construction failed.
    #[error("Backend initialization failed: {message}")]
    BackendInit { message: String },

    /// Transport, protocol, or server error from a backend.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Duplicate backend `dir_name` in the registry.
    #[error("Backend already exists: {dir_name}")]
    AlreadyExists { dir_name: String },

    /// Malformed path or bad configuration field.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl FsError {
    /// The canonical POSIX errno for this error kind.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::NotAFile => libc::EISDIR,
            FsError::ReadOnly => libc::EROFS,
            FsError::Stale => libc::ESTALE,
            FsError::BackendInit { .. } => libc::EIO,
            FsError::Io { .. } => libc::EIO,
            FsError::AlreadyExists { .. } => libc::EEXIST,
            FsError::InvalidArgument { .. } => libc::EINVAL,
        }
    }
}

impl From<DriverError> for FsError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NotFound { .. } => FsError::NotFound,
            DriverError::Stale { .. } => FsError::Stale,
            other => FsError::Io {
                message: other.to_string(),
            },
        }
    }
}

impl From<KeyError> for FsError {
    fn from(err: KeyError) -> Self {
        FsError::InvalidArgument {
            message: err.to_string(),
        }
    }
}
