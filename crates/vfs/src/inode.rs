//! Inode table: maps mount-relative paths to inodes.
//!
//! Inode numbers come from a process-wide monotonic counter and are never
//! reused. The root inode (1) is synthetic and lists backends as its
//! children; each backend's `dir_name` resolves to a per-backend synthetic
//! directory. Everything below that is discovered through the backend's
//! `stat_file` / `stat_directory` operations on first lookup.
//!
//! Directory keys are stored with a trailing `/` (or empty for a backend
//! root) so a file `a` and a directory `a/` under the same prefix occupy
//! distinct table slots.

use std::collections::HashMap;
use std::time::SystemTime;

use msfs_common::{join_key, validate_name_component, ROOT_INODE};
use msfs_storage::DriverError;

use crate::cache::CacheLine;
use crate::core::Core;
use crate::error::FsError;
use crate::registry::BackendId;

/// What a resolved path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

/// One resolved path in the mounted namespace.
pub(crate) struct Inode {
    pub ino: u64,
    pub kind: InodeKind,
    /// Backend binding by id, a weak by-number reference: the inode does not
    /// keep the backend alive, and holders re-look the backend up in the
    /// registry. `None` only for the mount root.
    pub backend: BackendId,
    /// Backend-relative object key (files) or prefix (directories, empty or
    /// `/`-terminated).
    pub key: String,
    /// Parent inode number; the root is its own parent.
    pub parent: u64,
    pub size: u64,
    pub mtime: SystemTime,
    /// Strong validator recorded when the inode was discovered or last
    /// revalidated at open. Empty for directories.
    pub etag: String,
    /// This inode's cache lines by line number.
    pub lines: HashMap<u64, CacheLine>,
}

/// Attribute snapshot handed to the protocol adapter.
#[derive(Debug, Clone)]
pub struct InodeAttrs {
    pub ino: u64,
    pub kind: InodeKind,
    pub size: u64,
    pub mtime: SystemTime,
    pub etag: String,
}

impl Inode {
    pub fn attrs(&self) -> InodeAttrs {
        InodeAttrs {
            ino: self.ino,
            kind: self.kind,
            size: self.size,
            mtime: self.mtime,
            etag: self.etag.clone(),
        }
    }
}

/// Backend id used for the mount root, which has no backend binding.
const NO_BACKEND: BackendId = 0;

/// The inode table.
pub(crate) struct InodeTable {
    map: HashMap<u64, Inode>,
    /// `(backend, key)` to inode number; repeated lookups of the same path
    /// return the same inode for the lifetime of the process.
    by_path: HashMap<(BackendId, String), u64>,
    next_ino: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(
            ROOT_INODE,
            Inode {
                ino: ROOT_INODE,
                kind: InodeKind::Directory,
                backend: NO_BACKEND,
                key: String::new(),
                parent: ROOT_INODE,
                size: 0,
                mtime: SystemTime::now(),
                etag: String::new(),
                lines: HashMap::new(),
            },
        );
        Self {
            map,
            by_path: HashMap::new(),
            next_ino: ROOT_INODE + 1,
        }
    }

    pub fn get(&self, ino: u64) -> Option<&Inode> {
        self.map.get(&ino)
    }

    pub fn get_mut(&mut self, ino: u64) -> Option<&mut Inode> {
        self.map.get_mut(&ino)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    pub fn lookup_path(&self, backend: BackendId, key: &str) -> Option<u64> {
        self.by_path.get(&(backend, key.to_string())).copied()
    }

    /// Get or create the file inode for `(backend, key)`.
    pub fn intern_file(
        &mut self,
        backend: BackendId,
        parent: u64,
        key: String,
        etag: String,
        mtime: SystemTime,
        size: u64,
    ) -> u64 {
        if let Some(ino) = self.lookup_path(backend, &key) {
            return ino;
        }
        let ino = self.alloc_ino();
        self.by_path.insert((backend, key.clone()), ino);
        self.map.insert(
            ino,
            Inode {
                ino,
                kind: InodeKind::File,
                backend,
                key,
                parent,
                size,
                mtime,
                etag,
                lines: HashMap::new(),
            },
        );
        ino
    }

    /// Get or create the directory inode for `(backend, dir_key)`.
    ///
    /// `dir_key` must be empty (a backend root) or `/`-terminated.
    pub fn intern_dir(&mut self, backend: BackendId, parent: u64, dir_key: String) -> u64 {
        debug_assert!(dir_key.is_empty() || dir_key.ends_with('/'));
        if let Some(ino) = self.lookup_path(backend, &dir_key) {
            return ino;
        }
        let ino = self.alloc_ino();
        self.by_path.insert((backend, dir_key.clone()), ino);
        self.map.insert(
            ino,
            Inode {
                ino,
                kind: InodeKind::Directory,
                backend,
                key: dir_key,
                parent,
                size: 0,
                mtime: SystemTime::now(),
                etag: String::new(),
                lines: HashMap::new(),
            },
        );
        ino
    }

    /// Inode numbers of every inode bound to the given backend.
    pub fn inos_for_backend(&self, backend: BackendId) -> Vec<u64> {
        self.map
            .values()
            .filter(|inode| inode.backend == backend && inode.ino != ROOT_INODE)
            .map(|inode| inode.ino)
            .collect()
    }

    /// Detach an inode from the table and the path index, returning it.
    pub fn remove(&mut self, ino: u64) -> Option<Inode> {
        let inode = self.map.remove(&ino)?;
        self.by_path.remove(&(inode.backend, inode.key.clone()));
        Some(inode)
    }
}

impl Core {
    /// Resolve `name` within the directory `parent`.
    ///
    /// A component resolves to a file iff `stat_file` succeeds; otherwise a
    /// directory iff `stat_directory` succeeds; otherwise `NotFound`.
    pub async fn lookup(&self, parent: u64, name: &str) -> Result<InodeAttrs, FsError> {
        validate_name_component(name)?;

        // Resolution state snapshotted under the lock: either an immediate
        // answer, or the driver and keys needed to consult the backend.
        let (backend_id, driver, file_key, dir_key) = {
            let state = self.lock();
            let parent_inode = state.inodes.get(parent).ok_or(FsError::NotFound)?;
            if parent_inode.kind != InodeKind::Directory {
                return Err(FsError::NotADirectory);
            }

            if parent == ROOT_INODE {
                // The root's children are the backend synthetic directories.
                let entry = state
                    .registry
                    .lookup_dir(name)
                    .filter(|entry| !entry.draining)
                    .ok_or(FsError::NotFound)?;
                let inode = state
                    .inodes
                    .get(entry.root_ino)
                    .ok_or(FsError::NotFound)?;
                return Ok(inode.attrs());
            }

            let backend_id = parent_inode.backend;
            let entry = state.registry.get(backend_id).ok_or(FsError::NotFound)?;
            if entry.draining {
                return Err(FsError::NotFound);
            }

            let file_key = join_key(parent_inode.key.trim_end_matches('/'), name);
            let dir_key = format!("{file_key}/");

            if let Some(ino) = state
                .inodes
                .lookup_path(backend_id, &file_key)
                .or_else(|| state.inodes.lookup_path(backend_id, &dir_key))
            {
                if let Some(inode) = state.inodes.get(ino) {
                    return Ok(inode.attrs());
                }
            }

            (backend_id, entry.driver.clone(), file_key, dir_key)
        };

        match driver.stat_file(&file_key, None).await {
            Ok(stat) => {
                let mut state = self.lock();
                // The backend may have started draining while the stat was
                // in flight; do not bind a new inode to it.
                let entry = state.registry.get(backend_id).ok_or(FsError::NotFound)?;
                if entry.draining {
                    return Err(FsError::NotFound);
                }
                let ino = state.inodes.intern_file(
                    backend_id, parent, file_key, stat.etag, stat.mtime, stat.size,
                );
                Ok(state.inodes.get(ino).ok_or(FsError::NotFound)?.attrs())
            }
            Err(DriverError::NotFound { .. }) => {
                match driver.stat_directory(&dir_key).await {
                    Ok(()) => {
                        let mut state = self.lock();
                        let entry =
                            state.registry.get(backend_id).ok_or(FsError::NotFound)?;
                        if entry.draining {
                            return Err(FsError::NotFound);
                        }
                        let ino = state.inodes.intern_dir(backend_id, parent, dir_key);
                        Ok(state.inodes.get(ino).ok_or(FsError::NotFound)?.attrs())
                    }
                    Err(DriverError::NotFound { .. }) => Err(FsError::NotFound),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Attributes of an inode.
    pub fn getattr(&self, ino: u64) -> Result<InodeAttrs, FsError> {
        let state = self.lock();
        state
            .inodes
            .get(ino)
            .map(Inode::attrs)
            .ok_or(FsError::NotFound)
    }
}
