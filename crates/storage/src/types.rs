//! Shared data structures for backend driver operations.

use std::time::SystemTime;

use bytes::Bytes;

/// Metadata for a single object, as returned by `stat_file`.
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Opaque strong validator for this object version (quotes trimmed).
    pub etag: String,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Object size in bytes.
    pub size: u64,
}

/// One file entry from a directory listing page.
#[derive(Debug, Clone)]
pub struct ListedFile {
    /// Name relative to the listed directory (no `/`).
    pub basename: String,
    /// Opaque strong validator (quotes trimmed).
    pub etag: String,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Object size in bytes.
    pub size: u64,
}

/// One page of a directory listing.
///
/// `next_cookie` is an opaque continuation token; `None` means the directory
/// has been completely enumerated. The cookie is only meaningful when passed
/// back to the same driver.
#[derive(Debug, Clone, Default)]
pub struct DirPage {
    /// Immediate subdirectory names (no trailing `/`).
    pub subdirs: Vec<String>,
    /// Files directly under the listed directory.
    pub files: Vec<ListedFile>,
    /// Continuation cookie for the next page, if any.
    pub next_cookie: Option<String>,
}

/// The result of a ranged `read_file`.
#[derive(Debug, Clone)]
pub struct ReadChunk {
    /// ETag observed on the response (quotes trimmed).
    pub etag: String,
    /// The bytes of the requested range; short at end-of-object.
    pub bytes: Bytes,
}
