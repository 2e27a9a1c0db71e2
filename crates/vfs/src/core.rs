//! Shared runtime state for the filesystem core.
//!
//! # Locking discipline
//!
//! One exclusive mutex protects the backend registry, the inode table, every
//! inode's cache-line map, the clean-LRU, the open-handle tables, and all
//! counters. Critical sections are short map and list operations; driver I/O
//! always happens outside the lock, with workers snapshotting the fields they
//! need before releasing it. The lock is a `std::sync::Mutex` and is never
//! held across an await point.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::handlers::{OpenDirState, OpenFileState};
use crate::inode::InodeTable;
use crate::options::CacheOptions;
use crate::registry::Registry;

/// The key of a cache line in the global clean-LRU: `(inode, line_number)`.
pub type LineKey = (u64, u64);

/// Everything owned by the global lock.
pub(crate) struct CoreState {
    /// Configured backends.
    pub registry: Registry,
    /// Inode table, including every inode's cache-line map.
    pub inodes: InodeTable,
    /// Clean cache lines ordered front = LRU, back = MRU.
    pub clean_lru: hashlink::LinkedHashMap<LineKey, ()>,
    /// Cache lines currently in `Inbound`, across all backends.
    pub inbound_count: u64,
    /// Open file handles.
    pub open_files: std::collections::HashMap<u64, OpenFileState>,
    /// Open directory handles.
    pub open_dirs: std::collections::HashMap<u64, OpenDirState>,
    /// Next file/directory handle number.
    pub next_fh: u64,
    /// Cache-line hits served without a fetch.
    pub hit_count: u64,
    /// Cache-line misses that scheduled a fetch.
    pub miss_count: u64,
}

impl CoreState {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            inodes: InodeTable::new(),
            clean_lru: hashlink::LinkedHashMap::new(),
            inbound_count: 0,
            open_files: std::collections::HashMap::new(),
            open_dirs: std::collections::HashMap::new(),
            next_fh: 1,
            hit_count: 0,
            miss_count: 0,
        }
    }

    pub fn alloc_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }
}

/// The filesystem core: cache engine, inode table, and backend registry
/// behind a single global lock.
pub struct Core {
    pub(crate) opts: CacheOptions,
    pub(crate) state: Mutex<CoreState>,
    /// Signaled whenever an in-flight fetch completes; the reconfiguration
    /// driver waits on it for a draining backend's inbound count to reach
    /// zero.
    pub(crate) drained: Notify,
    /// Serializes reconfiguration runs.
    pub(crate) reload_lock: tokio::sync::Mutex<()>,
}

impl Core {
    /// Create a core with the given cache options and an empty backend set.
    pub fn new(opts: CacheOptions) -> Arc<Self> {
        Arc::new(Self {
            opts,
            state: Mutex::new(CoreState::new()),
            drained: Notify::new(),
            reload_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The cache options this core was built with.
    pub fn options(&self) -> CacheOptions {
        self.opts
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap()
    }

    /// Snapshot of the core's counters for diagnostics.
    pub fn stats(&self) -> CoreStats {
        let state = self.lock();
        CoreStats {
            backends: state.registry.len(),
            inodes: state.inodes.len(),
            inbound_count: state.inbound_count,
            clean_lines: state.clean_lru.len() as u64,
            open_files: state.open_files.len(),
            open_dirs: state.open_dirs.len(),
            hit_count: state.hit_count,
            miss_count: state.miss_count,
        }
    }
}

/// Point-in-time view of the core's counters.
///
/// `inbound_count` is the number of fetches in flight; a stuck backend shows
/// up here long before anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreStats {
    /// Registered backends, draining included.
    pub backends: usize,
    /// Live inodes, synthetic directories included.
    pub inodes: usize,
    /// Cache lines currently being fetched.
    pub inbound_count: u64,
    /// Cache lines on the clean-LRU.
    pub clean_lines: u64,
    /// Open file handles.
    pub open_files: usize,
    /// Open directory handles.
    pub open_dirs: usize,
    /// Reads served from a resident line.
    pub hit_count: u64,
    /// Reads that scheduled a fetch.
    pub miss_count: u64,
}
