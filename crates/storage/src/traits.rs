//! The backend driver capability consumed by the cache core.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::types::{DirPage, FileStat, ReadChunk};

/// Low-level object-storage operations - implemented by each backend driver.
///
/// Paths are backend-relative object keys; the driver prepends its configured
/// bucket prefix. Directory paths are either empty (the backend root) or end
/// with `/`. Retries and authentication are the driver's responsibility.
///
/// `if_match`, where accepted, must be treated as a strong precondition: if
/// the stored object's validator differs, the driver returns
/// [`DriverError::Stale`], emulating the check with HEAD-then-GET when the
/// server does not honor `If-Match` natively.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// Fetch file metadata at the given path.
    ///
    /// Returns `NotFound` if the path does not name an object.
    async fn stat_file(&self, path: &str, if_match: Option<&str>)
        -> Result<FileStat, DriverError>;

    /// Verify that the given path refers to a directory (a non-empty prefix).
    ///
    /// Whether an empty prefix is visible as a directory is driver-dependent;
    /// see the driver docs.
    async fn stat_directory(&self, path: &str) -> Result<(), DriverError>;

    /// Fetch one page of the directory at the given path.
    ///
    /// `max_items` of zero lets the driver pick its page size. `cookie` is
    /// the opaque continuation token from the previous page's `next_cookie`.
    async fn list_directory(
        &self,
        path: &str,
        max_items: usize,
        cookie: Option<&str>,
    ) -> Result<DirPage, DriverError>;

    /// Read one cache line of the file at the given path.
    ///
    /// The byte range is `[line_number * line_size, (line_number + 1) *
    /// line_size - 1]` where `line_size` was fixed at driver construction.
    /// The last line of an object is short. Reads entirely past the end of
    /// the object yield an empty chunk.
    async fn read_file(
        &self,
        path: &str,
        line_number: u64,
        if_match: Option<&str>,
    ) -> Result<ReadChunk, DriverError>;
}
