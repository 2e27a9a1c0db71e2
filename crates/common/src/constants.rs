//! Shared constants used across msfs crates.

/// The filesystem type tag used by mount(8) and the mount helper.
pub const FS_TYPE_TAG: &str = "msfs";

/// Inode number of the synthetic mount root.
pub const ROOT_INODE: u64 = 1;

/// Default cache line size (1MB).
/// Chosen to amortize object-store request latency; must be a power of two.
pub const DEFAULT_CACHE_LINE_SIZE: u64 = 1024 * 1024;

/// Default number of cache-line slots across all inodes.
pub const DEFAULT_CACHE_LINES: u64 = 1024;

/// Default prefetch window (disabled).
pub const DEFAULT_PREFETCH_WINDOW: u64 = 0;

/// Default page size requested from backend directory listings.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;
