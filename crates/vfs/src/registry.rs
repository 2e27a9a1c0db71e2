//! Backend registry: the set of active backends keyed by `dir_name`.
//!
//! All methods run under the global lock. Driver contexts are constructed
//! *before* an entry becomes visible (see `reload.rs`); unregistration is the
//! two-phase drain-then-destroy sequence driven by the reconfiguration
//! driver.

use std::sync::Arc;

use msfs_storage::BackendDriver;

use crate::error::FsError;

/// Stable identifier of a registered backend within this process.
pub type BackendId = u64;

/// One registered backend.
pub(crate) struct BackendEntry {
    pub id: BackendId,
    /// Top-level subdirectory under the mount point.
    pub dir_name: String,
    /// Driver context; `Arc` so fetch workers can perform I/O outside the
    /// lock. The context is destroyed when the last clone drops after the
    /// entry is removed.
    pub driver: Arc<dyn BackendDriver>,
    /// Set while the backend is being removed; no new inodes bind to a
    /// draining backend.
    pub draining: bool,
    /// In-flight fetches bound to this backend.
    pub inbound_count: u64,
    /// Inode of this backend's synthetic root directory.
    pub root_ino: u64,
}

/// Registry of active backends.
pub(crate) struct Registry {
    by_id: std::collections::HashMap<BackendId, BackendEntry>,
    by_dir: std::collections::HashMap<String, BackendId>,
    next_id: BackendId,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            by_id: std::collections::HashMap::new(),
            by_dir: std::collections::HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert a backend whose driver context has already been constructed.
    ///
    /// # Errors
    /// `AlreadyExists` if the `dir_name` is taken; the registry is left
    /// unchanged.
    pub fn insert(
        &mut self,
        dir_name: String,
        driver: Arc<dyn BackendDriver>,
        root_ino: u64,
    ) -> Result<BackendId, FsError> {
        if self.by_dir.contains_key(&dir_name) {
            return Err(FsError::AlreadyExists { dir_name });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_dir.insert(dir_name.clone(), id);
        self.by_id.insert(
            id,
            BackendEntry {
                id,
                dir_name,
                driver,
                draining: false,
                inbound_count: 0,
                root_ino,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: BackendId) -> Option<&BackendEntry> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: BackendId) -> Option<&mut BackendEntry> {
        self.by_id.get_mut(&id)
    }

    /// Look up a backend by its `dir_name`.
    pub fn lookup_dir(&self, dir_name: &str) -> Option<&BackendEntry> {
        self.by_dir.get(dir_name).and_then(|id| self.by_id.get(id))
    }

    /// Active (non-draining) backends ordered by `dir_name`.
    pub fn list(&self) -> Vec<&BackendEntry> {
        let mut entries: Vec<&BackendEntry> = self
            .by_id
            .values()
            .filter(|entry| !entry.draining)
            .collect();
        entries.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        entries
    }

    /// The `dir_name`s of all entries, draining included.
    pub fn dir_names(&self) -> Vec<String> {
        self.by_dir.keys().cloned().collect()
    }

    /// Mark a backend as draining so no new inode lookups bind to it.
    pub fn mark_draining(&mut self, id: BackendId) {
        if let Some(entry) = self.by_id.get_mut(&id) {
            entry.draining = true;
        }
    }

    /// Remove an entry, dropping the registry's reference to its driver
    /// context. Callers must have drained the backend first.
    pub fn remove(&mut self, id: BackendId) -> Option<BackendEntry> {
        let entry = self.by_id.remove(&id)?;
        self.by_dir.remove(&entry.dir_name);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}
