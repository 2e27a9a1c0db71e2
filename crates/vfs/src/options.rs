//! Configuration consumed by the filesystem core.
//!
//! The mount configuration file is parsed by the CLI crate; only the fields
//! described here reach the core. Unknown keys are ignored so configurations
//! can carry fields for newer releases (the write-related ones in particular
//! are not consumed in this release).

use serde::Deserialize;

use msfs_common::{
    validate_dir_name, DEFAULT_CACHE_LINES, DEFAULT_CACHE_LINE_SIZE, DEFAULT_PREFETCH_WINDOW,
};
use msfs_storage::{AisOptions, S3Options};

use crate::error::FsError;

/// Cache engine tuning, validated.
///
/// # Example
///
/// ```
/// use msfs_vfs::CacheOptions;
///
/// let opts = CacheOptions::new(1024 * 1024, 8, 3).unwrap();
/// assert_eq!(opts.line_number(3 * 1024 * 1024 + 1), 3);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// Cache line size in bytes. Positive power of two.
    pub cache_line_size: u64,
    /// Maximum number of cache-line slots across all inodes.
    pub cache_lines: u64,
    /// Additional sequential lines scheduled on each read miss.
    pub prefetch_window: u64,
}

impl CacheOptions {
    /// Validate and build cache options.
    ///
    /// # Errors
    /// `InvalidArgument` if `cache_line_size` is zero or not a power of two,
    /// or if `cache_lines` is zero.
    pub fn new(
        cache_line_size: u64,
        cache_lines: u64,
        prefetch_window: u64,
    ) -> Result<Self, FsError> {
        if cache_line_size == 0 || !cache_line_size.is_power_of_two() {
            return Err(FsError::InvalidArgument {
                message: format!(
                    "cache_line_size must be a positive power of two, got {cache_line_size}"
                ),
            });
        }
        if cache_lines == 0 {
            return Err(FsError::InvalidArgument {
                message: "cache_lines must be positive".to_string(),
            });
        }
        Ok(Self {
            cache_line_size,
            cache_lines,
            prefetch_window,
        })
    }

    /// The line number covering the given byte offset.
    pub fn line_number(&self, offset: u64) -> u64 {
        offset / self.cache_line_size
    }

    /// The line number of the last line of an object of `size` bytes, if any.
    pub fn last_line(&self, size: u64) -> Option<u64> {
        (size != 0).then(|| (size - 1) / self.cache_line_size)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_line_size: DEFAULT_CACHE_LINE_SIZE,
            cache_lines: DEFAULT_CACHE_LINES,
            prefetch_window: DEFAULT_PREFETCH_WINDOW,
        }
    }
}

/// The mount configuration fields consumed by the core.
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    /// Cache line size in bytes.
    #[serde(default = "default_cache_line_size")]
    pub cache_line_size: u64,
    /// Maximum number of cache-line slots.
    #[serde(default = "default_cache_lines")]
    pub cache_lines: u64,
    /// Prefetch window (0 disables prefetch).
    #[serde(default)]
    pub prefetch_window: u64,
    /// Optional reload period in seconds, in addition to external signals.
    #[serde(default)]
    pub auto_reload_interval: Option<u64>,
    /// Configured backends.
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
}

fn default_cache_line_size() -> u64 {
    DEFAULT_CACHE_LINE_SIZE
}

fn default_cache_lines() -> u64 {
    DEFAULT_CACHE_LINES
}

impl MountConfig {
    /// Validate the cache tuning fields.
    pub fn cache_options(&self) -> Result<CacheOptions, FsError> {
        CacheOptions::new(self.cache_line_size, self.cache_lines, self.prefetch_window)
    }
}

/// One configured backend binding.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSpec {
    /// Top-level subdirectory under the mount point.
    pub dir_name: String,
    /// Bucket or container name.
    pub bucket: String,
    /// Key prefix within the bucket; may be empty.
    #[serde(default)]
    pub prefix: String,
    /// Per-backend request logging verbosity.
    #[serde(default)]
    pub trace_level: u8,
    /// Driver variant and driver-specific options.
    #[serde(flatten)]
    pub driver: DriverSpec,
}

impl BackendSpec {
    /// Validate the spec and return the prefix normalized to be empty or
    /// `/`-terminated, the form the drivers expect.
    pub fn validate(&self) -> Result<String, FsError> {
        validate_dir_name(&self.dir_name)?;
        if self.bucket.is_empty() {
            return Err(FsError::InvalidArgument {
                message: format!("backend {}: bucket is required", self.dir_name),
            });
        }
        let mut prefix = self.prefix.clone();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Ok(prefix)
    }
}

/// Driver variant tag plus driver-specific options.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DriverSpec {
    /// S3-compatible endpoint via the AWS SDK.
    S3(S3Options),
    /// AIStore cluster via its HTTP API.
    Aistore(AisOptions),
}
