//! Integration tests for path resolution, directory listing, and the
//! handle layer.

mod support;

use std::sync::Arc;

use msfs_common::ROOT_INODE;
use msfs_vfs::{CacheOptions, Core, DirEntry, FsError, InodeKind};

use support::{payload, MockBackend};

const LINE: u64 = 1024;

fn new_core(backend: Arc<MockBackend>) -> Arc<Core> {
    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    core.register_driver("data", backend).unwrap();
    core
}

/// Drain a directory handle the way the kernel does: repeated calls with an
/// advancing offset until nothing comes back.
async fn list_all(core: &Arc<Core>, ino: u64) -> Vec<DirEntry> {
    let fh = core.opendir(ino).unwrap();
    let mut all: Vec<DirEntry> = Vec::new();
    loop {
        let chunk = core.readdir(fh, all.len() as u64).await.unwrap();
        if chunk.is_empty() {
            break;
        }
        all.extend(chunk);
    }
    core.releasedir(fh);
    all
}

fn names(entries: &[DirEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

#[tokio::test]
async fn test_root_lists_backends_sorted() {
    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    core.register_driver("zeta", MockBackend::new(LINE)).unwrap();
    core.register_driver("alpha", MockBackend::new(LINE)).unwrap();

    let entries = list_all(&core, ROOT_INODE).await;
    assert_eq!(names(&entries), vec![".", "..", "alpha", "zeta"]);
    assert_eq!(entries[0].ino, ROOT_INODE);
    assert_eq!(entries[1].ino, ROOT_INODE);
    assert!(entries[2..].iter().all(|e| e.kind == InodeKind::Directory));

    let alpha = core.lookup(ROOT_INODE, "alpha").await.unwrap();
    assert_eq!(alpha.ino, entries[2].ino);
    assert!(matches!(
        core.lookup(ROOT_INODE, "missing").await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn test_lookup_resolves_files_and_directories() {
    let backend = MockBackend::new(LINE);
    backend.put("weights.bin", payload(1, 100), 1);
    backend.put("shards/part-00", payload(2, 200), 1);
    let core = new_core(backend);

    let dir = core.lookup(ROOT_INODE, "data").await.unwrap();
    assert_eq!(dir.kind, InodeKind::Directory);

    let file = core.lookup(dir.ino, "weights.bin").await.unwrap();
    assert_eq!(file.kind, InodeKind::File);
    assert_eq!(file.size, 100);
    assert!(!file.etag.is_empty());

    let shards = core.lookup(dir.ino, "shards").await.unwrap();
    assert_eq!(shards.kind, InodeKind::Directory);
    let part = core.lookup(shards.ino, "part-00").await.unwrap();
    assert_eq!(part.size, 200);

    assert!(matches!(
        core.lookup(dir.ino, "nope").await,
        Err(FsError::NotFound)
    ));
    // A file cannot be a path component.
    assert!(matches!(
        core.lookup(file.ino, "child").await,
        Err(FsError::NotADirectory)
    ));
    // Reserved and malformed components are rejected outright.
    assert!(matches!(
        core.lookup(dir.ino, "..").await,
        Err(FsError::InvalidArgument { .. })
    ));
    assert!(matches!(
        core.lookup(dir.ino, "a/b").await,
        Err(FsError::InvalidArgument { .. })
    ));
}

#[tokio::test]
async fn test_repeated_lookup_returns_same_inode() {
    let backend = MockBackend::new(LINE);
    backend.put("stable", payload(1, 10), 1);
    let core = new_core(backend);
    let dir = core.lookup(ROOT_INODE, "data").await.unwrap().ino;

    let first = core.lookup(dir, "stable").await.unwrap().ino;
    let second = core.lookup(dir, "stable").await.unwrap().ino;
    assert_eq!(first, second);

    // Discovery through readdir interns the same inode lookup would.
    let entries = list_all(&core, dir).await;
    let listed = entries.iter().find(|e| e.name == "stable").unwrap();
    assert_eq!(listed.ino, first);

    assert_eq!(core.getattr(first).unwrap().size, 10);
}

#[tokio::test]
async fn test_readdir_merges_files_and_prefixes_in_order() {
    // Files "b" and "d", common prefixes "a/" and "c/".
    for (page, flat) in [(usize::MAX, false), (2, false), (1, true)] {
        let backend = MockBackend::with_page_size(LINE, page, flat);
        backend.put("b", payload(1, 1), 1);
        backend.put("d", payload(2, 2), 1);
        backend.put("a/x", payload(3, 3), 1);
        backend.put("c/y", payload(4, 4), 1);
        let core = new_core(backend);
        let dir = core.lookup(ROOT_INODE, "data").await.unwrap().ino;

        let entries = list_all(&core, dir).await;
        assert_eq!(
            names(&entries),
            vec![".", "..", "a", "b", "c", "d"],
            "page={page} flat={flat}"
        );
        assert_eq!(entries[2].kind, InodeKind::Directory);
        assert_eq!(entries[3].kind, InodeKind::File);
        assert_eq!(entries[4].kind, InodeKind::Directory);
        assert_eq!(entries[5].kind, InodeKind::File);
    }
}

#[tokio::test]
async fn test_readdir_reports_each_entry_once_across_pages() {
    // Flat listing with one key per page surfaces the "sub" prefix on
    // every page; the handler must emit it once.
    let backend = MockBackend::with_page_size(LINE, 1, true);
    backend.put("sub/x1", payload(1, 1), 1);
    backend.put("sub/x2", payload(2, 2), 1);
    backend.put("sub/x3", payload(3, 3), 1);
    backend.put("top", payload(4, 4), 1);
    let core = new_core(backend);
    let dir = core.lookup(ROOT_INODE, "data").await.unwrap().ino;

    let entries = list_all(&core, dir).await;
    assert_eq!(names(&entries), vec![".", "..", "sub", "top"]);
}

#[tokio::test]
async fn test_readdir_of_subdirectory_has_dot_entries() {
    let backend = MockBackend::new(LINE);
    backend.put("sub/inner/leaf", payload(1, 1), 1);
    let core = new_core(backend);
    let dir = core.lookup(ROOT_INODE, "data").await.unwrap().ino;
    let sub = core.lookup(dir, "sub").await.unwrap().ino;

    let entries = list_all(&core, sub).await;
    assert_eq!(names(&entries), vec![".", "..", "inner"]);
    assert_eq!(entries[0].ino, sub);
    assert_eq!(entries[1].ino, dir);
}

#[tokio::test]
async fn test_opendir_and_open_kind_checks() {
    let backend = MockBackend::new(LINE);
    backend.put("f", payload(1, 10), 1);
    let core = new_core(backend);
    let dir = core.lookup(ROOT_INODE, "data").await.unwrap().ino;
    let file = core.lookup(dir, "f").await.unwrap().ino;

    assert!(matches!(core.opendir(file), Err(FsError::NotADirectory)));
    assert!(matches!(core.open(dir).await, Err(FsError::NotAFile)));
    assert!(matches!(core.opendir(9999), Err(FsError::NotFound)));
}

#[tokio::test]
async fn test_read_through_handle() {
    let backend = MockBackend::new(LINE);
    let data = payload(21, 2 * LINE as usize + 100);
    backend.put("f", data.clone(), 1);
    let core = new_core(backend);
    let dir = core.lookup(ROOT_INODE, "data").await.unwrap().ino;
    let file = core.lookup(dir, "f").await.unwrap().ino;

    let (fh, attrs) = core.open(file).await.unwrap();
    assert_eq!(attrs.size, data.len() as u64);

    let bytes = core.read(fh, 0, data.len() as u32).await.unwrap();
    assert_eq!(bytes.as_ref(), data.as_slice());

    // Read at offset == size returns zero bytes.
    assert!(core
        .read(fh, data.len() as u64, LINE as u32)
        .await
        .unwrap()
        .is_empty());

    core.release(fh);
    assert!(matches!(
        core.read(fh, 0, 16).await,
        Err(FsError::Io { .. })
    ));
}

#[tokio::test]
async fn test_object_change_invalidates_handle_until_reopen() {
    let backend = MockBackend::new(LINE);
    backend.put("model", payload(1, LINE as usize), 1);
    let core = new_core(backend.clone());
    let dir = core.lookup(ROOT_INODE, "data").await.unwrap().ino;
    let file = core.lookup(dir, "model").await.unwrap().ino;

    let (fh, _) = core.open(file).await.unwrap();

    // The object changes between open and the first read.
    let new_data = payload(99, LINE as usize + 50);
    backend.put("model", new_data.clone(), 2);

    assert!(matches!(core.read(fh, 0, 64).await, Err(FsError::Stale)));
    // The handle stays invalid.
    assert!(matches!(core.read(fh, 0, 64).await, Err(FsError::Stale)));

    // A fresh open sees the new content.
    let (fh2, attrs) = core.open(file).await.unwrap();
    assert_eq!(attrs.size, new_data.len() as u64);
    let bytes = core
        .read(fh2, 0, new_data.len() as u32)
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), new_data.as_slice());
}

#[tokio::test]
async fn test_statfs_and_read_only() {
    let core = new_core(MockBackend::new(LINE));
    let st = core.statfs();
    assert_eq!(st.namelen, 255);
    assert_eq!(st.bsize, 4096);
    assert_eq!(core.read_only().errno(), libc::EROFS);
}
