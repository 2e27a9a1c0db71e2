//! Request handlers: the thin layer between the user-space filesystem
//! protocol and the core.
//!
//! Handlers own the open-handle tables. File handles record the ETag seen at
//! open time; a handle whose object has changed underneath it is invalidated
//! and every subsequent operation on it returns `Stale`. Write-side
//! operations are rejected wholesale - the filesystem is read-only.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use msfs_common::{join_key, DEFAULT_LIST_PAGE_SIZE, ROOT_INODE};
use msfs_storage::DirPage;

use crate::core::Core;
use crate::error::FsError;
use crate::inode::{InodeAttrs, InodeKind};

/// State of one open file handle.
pub(crate) struct OpenFileState {
    pub ino: u64,
    /// ETag recorded at open time; the handle's snapshot identity.
    pub etag: String,
    /// Set once the handle observes `Stale`; never cleared.
    pub stale: bool,
}

/// State of one open directory handle.
///
/// Listing pages are merged into `entries` as they arrive; the backend
/// continuation cookie is stable for the lifetime of the handle.
pub(crate) struct OpenDirState {
    pub ino: u64,
    pub entries: Vec<DirEntry>,
    pub cookie: Option<String>,
    pub exhausted: bool,
    /// Subdirectory names already emitted, for cross-page deduplication.
    pub seen_subdirs: HashSet<String>,
}

/// One directory entry as handed to the protocol adapter.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: InodeKind,
}

/// Fixed values reported by `statfs`; the real capacity of the backends is
/// not known.
#[derive(Debug, Clone, Copy)]
pub struct FsStatvfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl Core {
    /// Open a file, revalidating its attributes against the backend.
    ///
    /// Returns the handle and the (possibly refreshed) attributes. If the
    /// object changed since it was last seen, the inode's resident cache
    /// lines are dropped so the new handle reads the new content.
    pub async fn open(self: &Arc<Self>, ino: u64) -> Result<(u64, InodeAttrs), FsError> {
        let (driver, key) = {
            let state = self.lock();
            let inode = state.inodes.get(ino).ok_or(FsError::NotFound)?;
            if inode.kind != InodeKind::File {
                return Err(FsError::NotAFile);
            }
            let entry = state
                .registry
                .get(inode.backend)
                .ok_or(FsError::Stale)?;
            (entry.driver.clone(), inode.key.clone())
        };

        let stat = driver.stat_file(&key, None).await?;

        let mut state = self.lock();
        let state = &mut *state;
        let inode = state.inodes.get_mut(ino).ok_or(FsError::Stale)?;

        if inode.etag != stat.etag {
            log::debug!(
                "inode {ino} changed at open ({} -> {}), dropping {} resident lines",
                inode.etag,
                stat.etag,
                inode.lines.len(),
            );
            // Drop resident content recorded under the old validator. Inbound
            // lines stay: eviction never touches them, and their fetches fail
            // the old precondition and unwind on their own.
            inode
                .lines
                .retain(|line_no, line| {
                    let keep = line.latch.is_some();
                    if !keep {
                        state.clean_lru.remove(&(ino, *line_no));
                    }
                    keep
                });
            inode.etag = stat.etag.clone();
            inode.size = stat.size;
            inode.mtime = stat.mtime;
        }

        let attrs = inode.attrs();
        let fh = state.alloc_fh();
        state.open_files.insert(
            fh,
            OpenFileState {
                ino,
                etag: stat.etag,
                stale: false,
            },
        );
        Ok((fh, attrs))
    }

    /// Read from an open file handle.
    ///
    /// Reads from one handle are serviced against the snapshot identified by
    /// the handle's open-time ETag; once the object changes, the handle is
    /// invalid and stays invalid.
    pub async fn read(
        self: &Arc<Self>,
        fh: u64,
        offset: u64,
        length: u32,
    ) -> Result<Bytes, FsError> {
        let ino = {
            let mut state = self.lock();
            let handle = state.open_files.get(&fh).ok_or_else(|| FsError::Io {
                message: format!("unknown file handle {fh}"),
            })?;
            if handle.stale {
                return Err(FsError::Stale);
            }
            let ino = handle.ino;
            let current = state.inodes.get(ino).map(|inode| inode.etag.clone());
            match current {
                Some(etag) if etag == handle.etag => ino,
                _ => {
                    // The inode was torn down or reopened against a newer
                    // object version; this handle's snapshot is gone.
                    if let Some(handle) = state.open_files.get_mut(&fh) {
                        handle.stale = true;
                    }
                    return Err(FsError::Stale);
                }
            }
        };

        match self.read_inode(ino, offset, length).await {
            Err(FsError::Stale) => {
                let mut state = self.lock();
                if let Some(handle) = state.open_files.get_mut(&fh) {
                    handle.stale = true;
                }
                Err(FsError::Stale)
            }
            other => other,
        }
    }

    /// Release an open file handle. No flush: the filesystem is read-only.
    pub fn release(&self, fh: u64) {
        self.lock().open_files.remove(&fh);
    }

    /// Open a directory handle with a null continuation cookie.
    pub fn opendir(&self, ino: u64) -> Result<u64, FsError> {
        let mut state = self.lock();
        let state = &mut *state;
        let inode = state.inodes.get(ino).ok_or(FsError::NotFound)?;
        if inode.kind != InodeKind::Directory {
            return Err(FsError::NotADirectory);
        }

        let mut entries = vec![
            DirEntry {
                ino,
                name: ".".to_string(),
                kind: InodeKind::Directory,
            },
            DirEntry {
                ino: inode.parent,
                name: "..".to_string(),
                kind: InodeKind::Directory,
            },
        ];

        // The root's children are the backend synthetic directories; there
        // is no backend to page through.
        let exhausted = if ino == ROOT_INODE {
            for entry in state.registry.list() {
                entries.push(DirEntry {
                    ino: entry.root_ino,
                    name: entry.dir_name.clone(),
                    kind: InodeKind::Directory,
                });
            }
            true
        } else {
            false
        };

        let fh = state.alloc_fh();
        state.open_dirs.insert(
            fh,
            OpenDirState {
                ino,
                entries,
                cookie: None,
                exhausted,
                seen_subdirs: HashSet::new(),
            },
        );
        Ok(fh)
    }

    /// Read directory entries starting at `offset` entries into the listing.
    ///
    /// Returns an empty vector at end of directory. Entries appear exactly
    /// once across all pages, in a deterministic order: `.`, `..`, then
    /// case-sensitive lexicographic by basename with files before
    /// directories on ties.
    pub async fn readdir(self: &Arc<Self>, fh: u64, offset: u64) -> Result<Vec<DirEntry>, FsError> {
        loop {
            // Serve from the merged buffer when it covers the offset.
            let (dir_ino, dir_key, driver, cookie) = {
                let state = self.lock();
                let handle = state.open_dirs.get(&fh).ok_or_else(|| FsError::Io {
                    message: format!("unknown directory handle {fh}"),
                })?;
                if handle.exhausted || (offset as usize) < handle.entries.len() {
                    let from = (offset as usize).min(handle.entries.len());
                    return Ok(handle.entries[from..].to_vec());
                }

                let inode = state.inodes.get(handle.ino).ok_or(FsError::Stale)?;
                let entry = state
                    .registry
                    .get(inode.backend)
                    .ok_or(FsError::Stale)?;
                (
                    handle.ino,
                    inode.key.clone(),
                    entry.driver.clone(),
                    handle.cookie.clone(),
                )
            };

            let page = driver
                .list_directory(&dir_key, DEFAULT_LIST_PAGE_SIZE, cookie.as_deref())
                .await?;

            self.merge_page(fh, dir_ino, &dir_key, page)?;
        }
    }

    /// Merge one listing page into a directory handle's entry buffer.
    ///
    /// Files and common prefixes arrive as two streams; they are merged into
    /// a single lexicographic order (ties file-before-directory) and interned
    /// into the inode table as they are discovered.
    fn merge_page(
        &self,
        fh: u64,
        dir_ino: u64,
        dir_key: &str,
        mut page: DirPage,
    ) -> Result<(), FsError> {
        // An empty page means the directory is completely enumerated, even
        // if the backend handed back a continuation token.
        let page_empty = page.subdirs.is_empty() && page.files.is_empty();

        page.subdirs.sort_unstable();
        page.files
            .sort_unstable_by(|a, b| a.basename.cmp(&b.basename));

        let mut state = self.lock();
        let state = &mut *state;
        let backend_id = state
            .inodes
            .get(dir_ino)
            .ok_or(FsError::Stale)?
            .backend;
        let handle = state.open_dirs.get_mut(&fh).ok_or_else(|| FsError::Io {
            message: format!("unknown directory handle {fh}"),
        })?;

        let parent_key = dir_key.trim_end_matches('/');
        let mut files = page.files.into_iter().peekable();
        let mut subdirs = page.subdirs.into_iter().peekable();

        loop {
            // Files win ties so that an object and a prefix sharing a name
            // list in a stable order.
            let take_file = match (files.peek(), subdirs.peek()) {
                (Some(file), Some(subdir)) => file.basename.as_str() <= subdir.as_str(),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_file {
                let file = files.next().unwrap();
                let key = join_key(parent_key, &file.basename);
                let ino = state.inodes.intern_file(
                    backend_id, dir_ino, key, file.etag, file.mtime, file.size,
                );
                handle.entries.push(DirEntry {
                    ino,
                    name: file.basename,
                    kind: InodeKind::File,
                });
            } else {
                let subdir = subdirs.next().unwrap();
                // A flat-listing backend can surface the same prefix on
                // several pages; emit it once.
                if !handle.seen_subdirs.insert(subdir.clone()) {
                    continue;
                }
                let child_key = format!("{}/", join_key(parent_key, &subdir));
                let ino = state.inodes.intern_dir(backend_id, dir_ino, child_key);
                handle.entries.push(DirEntry {
                    ino,
                    name: subdir,
                    kind: InodeKind::Directory,
                });
            }
        }

        match page.next_cookie {
            Some(cookie) if !page_empty => handle.cookie = Some(cookie),
            _ => handle.exhausted = true,
        }
        Ok(())
    }

    /// Release an open directory handle.
    pub fn releasedir(&self, fh: u64) {
        self.lock().open_dirs.remove(&fh);
    }

    /// Synthesized filesystem statistics; real capacity is not known.
    pub fn statfs(&self) -> FsStatvfs {
        FsStatvfs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }

    /// The single answer for every write-side operation.
    pub fn read_only(&self) -> FsError {
        FsError::ReadOnly
    }
}
