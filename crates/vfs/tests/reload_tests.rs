//! Integration tests for the reconfiguration driver: registry rules,
//! drain-then-destroy teardown, and reload deltas.

mod support;

use std::sync::Arc;
use std::time::Duration;

use msfs_common::ROOT_INODE;
use msfs_storage::AisOptions;
use msfs_vfs::{BackendSpec, CacheOptions, Core, DriverSpec, FsError};

use support::{payload, MockBackend};

const LINE: u64 = 1024;

fn ais_spec(dir_name: &str, endpoint: &str) -> BackendSpec {
    BackendSpec {
        dir_name: dir_name.to_string(),
        bucket: "bucket".to_string(),
        prefix: String::new(),
        trace_level: 0,
        driver: DriverSpec::Aistore(AisOptions {
            endpoint: endpoint.to_string(),
            ..AisOptions::default()
        }),
    }
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_bad_names() {
    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    core.register_driver("b1", MockBackend::new(LINE)).unwrap();

    assert!(matches!(
        core.register_driver("b1", MockBackend::new(LINE)),
        Err(FsError::AlreadyExists { .. })
    ));
    assert!(matches!(
        core.register_driver("a/b", MockBackend::new(LINE)),
        Err(FsError::InvalidArgument { .. })
    ));
    assert!(matches!(
        core.register_driver("", MockBackend::new(LINE)),
        Err(FsError::InvalidArgument { .. })
    ));
    assert_eq!(core.stats().backends, 1);
}

#[tokio::test]
async fn test_unregister_unknown_backend() {
    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    assert!(matches!(
        core.unregister_backend("ghost").await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_backend_with_in_flight_fetch() {
    let backend = MockBackend::with_read_delay(LINE, Duration::from_millis(150));
    backend.put("K", payload(6, 2 * LINE as usize), 1);

    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    core.register_driver("b1", backend.clone()).unwrap();
    let dir = core.lookup(ROOT_INODE, "b1").await.unwrap().ino;
    let ino = core.lookup(dir, "K").await.unwrap().ino;

    // Kick off a read whose fetch will still be in flight when the backend
    // is removed.
    let reader = {
        let core = Arc::clone(&core);
        tokio::spawn(async move { core.read_inode(ino, 0, LINE as u32).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(core.stats().inbound_count, 1);

    // Reload with an empty backend set removes b1, draining first.
    let summary = core.reload(&[]).await;
    assert_eq!(summary.removed, vec!["b1".to_string()]);

    // The completion path observed the missing inode and discarded the
    // buffer; the waiter sees a stale handle.
    assert!(matches!(reader.await.unwrap(), Err(FsError::Stale)));

    let stats = core.stats();
    assert_eq!(stats.backends, 0);
    assert_eq!(stats.inbound_count, 0);
    assert_eq!(stats.clean_lines, 0);
    assert_eq!(stats.inodes, 1); // only the root remains

    // The mount no longer lists b1.
    assert!(matches!(
        core.lookup(ROOT_INODE, "b1").await,
        Err(FsError::NotFound)
    ));

    // The driver context is destroyed once the last worker lets go.
    for _ in 0..100 {
        if Arc::strong_count(&backend) == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "driver context still referenced: {}",
        Arc::strong_count(&backend)
    );
}

#[tokio::test]
async fn test_removed_backend_cache_state_reclaimed() {
    let backend = MockBackend::new(LINE);
    backend.put("a", payload(1, LINE as usize), 1);
    backend.put("b", payload(2, LINE as usize), 1);

    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    core.register_driver("b1", backend.clone()).unwrap();
    let dir = core.lookup(ROOT_INODE, "b1").await.unwrap().ino;
    for name in ["a", "b"] {
        let ino = core.lookup(dir, name).await.unwrap().ino;
        core.read_inode(ino, 0, LINE as u32).await.unwrap();
    }
    assert_eq!(core.stats().clean_lines, 2);

    core.unregister_backend("b1").await.unwrap();

    let stats = core.stats();
    assert_eq!(stats.clean_lines, 0);
    assert_eq!(stats.inodes, 1);
    assert_eq!(stats.backends, 0);
}

#[tokio::test]
async fn test_reload_applies_delta_and_skips_failures() {
    let mock = MockBackend::new(LINE);
    mock.put("kept-file", payload(5, 64), 1);

    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    core.register_driver("keep", mock.clone()).unwrap();
    let keep_dir = core.lookup(ROOT_INODE, "keep").await.unwrap().ino;
    let kept_ino = core.lookup(keep_dir, "kept-file").await.unwrap().ino;

    let specs = vec![
        // Present in both sets: left untouched even though the config names
        // a different driver.
        ais_spec("keep", "http://ais-proxy:51080"),
        // New backend whose context constructs fine.
        ais_spec("fresh", "http://ais-proxy:51080"),
        // New backend whose context fails to construct: logged and skipped.
        ais_spec("broken", ""),
    ];
    let summary = core.reload(&specs).await;

    assert_eq!(summary.kept, vec!["keep".to_string()]);
    assert_eq!(summary.added, vec!["fresh".to_string()]);
    assert_eq!(summary.failed, vec!["broken".to_string()]);
    assert!(summary.removed.is_empty());

    // The kept backend still serves through its original driver context and
    // keeps its inodes.
    assert_eq!(
        core.lookup(keep_dir, "kept-file").await.unwrap().ino,
        kept_ino
    );
    let bytes = core.read_inode(kept_ino, 0, 64).await.unwrap();
    assert_eq!(bytes.as_ref(), payload(5, 64).as_slice());

    // The new backend is visible at the root; the broken one is not.
    assert!(core.lookup(ROOT_INODE, "fresh").await.is_ok());
    assert!(matches!(
        core.lookup(ROOT_INODE, "broken").await,
        Err(FsError::NotFound)
    ));
    assert_eq!(core.stats().backends, 2);
}

#[tokio::test]
async fn test_reload_ignores_duplicate_dir_names() {
    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    let specs = vec![
        ais_spec("dup", "http://ais-a:51080"),
        ais_spec("dup", "http://ais-b:51080"),
    ];
    let summary = core.reload(&specs).await;
    assert_eq!(summary.added, vec!["dup".to_string()]);
    assert_eq!(core.stats().backends, 1);
}

#[tokio::test]
async fn test_open_handle_goes_stale_after_backend_removal() {
    let backend = MockBackend::new(LINE);
    backend.put("f", payload(9, 32), 1);

    let core = Core::new(CacheOptions::new(LINE, 8, 0).unwrap());
    core.register_driver("b1", backend).unwrap();
    let dir = core.lookup(ROOT_INODE, "b1").await.unwrap().ino;
    let ino = core.lookup(dir, "f").await.unwrap().ino;
    let (fh, _) = core.open(ino).await.unwrap();

    core.unregister_backend("b1").await.unwrap();

    assert!(matches!(core.read(fh, 0, 16).await, Err(FsError::Stale)));
    core.release(fh);
}
