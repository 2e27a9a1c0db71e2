//! In-memory counting backend driver shared by the integration suites.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;

use msfs_storage::{BackendDriver, DirPage, DriverError, FileStat, ListedFile, ReadChunk};

/// One stored object.
#[derive(Debug, Clone)]
struct MockObject {
    etag: String,
    data: Vec<u8>,
}

/// Test backend driver that stores objects in memory and counts every
/// `read_file` call.
pub struct MockBackend {
    line_size: u64,
    objects: Mutex<BTreeMap<String, MockObject>>,
    read_calls: AtomicU64,
    read_calls_by_line: Mutex<HashMap<(String, u64), u64>>,
    /// Artificial latency per `read_file`, to widen coalescing windows.
    read_delay: Option<Duration>,
    /// Cap on listing page size, to force pagination.
    max_page: usize,
    /// When set, listings are flat (AIStore-style): prefixes are derived
    /// per page and may repeat across pages.
    flat_listing: bool,
}

impl MockBackend {
    pub fn new(line_size: u64) -> Arc<Self> {
        Arc::new(Self::unwrapped(line_size))
    }

    pub fn with_read_delay(line_size: u64, delay: Duration) -> Arc<Self> {
        let mut backend = Self::unwrapped(line_size);
        backend.read_delay = Some(delay);
        Arc::new(backend)
    }

    pub fn with_page_size(line_size: u64, max_page: usize, flat_listing: bool) -> Arc<Self> {
        let mut backend = Self::unwrapped(line_size);
        backend.max_page = max_page;
        backend.flat_listing = flat_listing;
        Arc::new(backend)
    }

    fn unwrapped(line_size: u64) -> Self {
        Self {
            line_size,
            objects: Mutex::new(BTreeMap::new()),
            read_calls: AtomicU64::new(0),
            read_calls_by_line: Mutex::new(HashMap::new()),
            read_delay: None,
            max_page: usize::MAX,
            flat_listing: false,
        }
    }

    /// Insert or replace an object. The ETag derives from the version tag so
    /// mutations are observable.
    pub fn put(&self, key: &str, data: Vec<u8>, version: u32) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            MockObject {
                etag: format!("etag-{key}-v{version}"),
                data,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls_for(&self, key: &str, line: u64) -> u64 {
        *self
            .read_calls_by_line
            .lock()
            .unwrap()
            .get(&(key.to_string(), line))
            .unwrap_or(&0)
    }
}

#[async_trait]
impl BackendDriver for MockBackend {
    async fn stat_file(&self, path: &str, if_match: Option<&str>) -> Result<FileStat, DriverError> {
        let objects = self.objects.lock().unwrap();
        let object = objects.get(path).ok_or_else(|| DriverError::NotFound {
            key: path.to_string(),
        })?;
        if let Some(tag) = if_match {
            if tag != object.etag {
                return Err(DriverError::Stale {
                    key: path.to_string(),
                });
            }
        }
        Ok(FileStat {
            etag: object.etag.clone(),
            mtime: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            size: object.data.len() as u64,
        })
    }

    async fn stat_directory(&self, path: &str) -> Result<(), DriverError> {
        if path.is_empty() {
            return Ok(());
        }
        let objects = self.objects.lock().unwrap();
        if objects.keys().any(|key| key.starts_with(path)) {
            Ok(())
        } else {
            Err(DriverError::NotFound {
                key: path.to_string(),
            })
        }
    }

    async fn list_directory(
        &self,
        path: &str,
        max_items: usize,
        cookie: Option<&str>,
    ) -> Result<DirPage, DriverError> {
        let objects = self.objects.lock().unwrap();
        let keys: Vec<&String> = objects.keys().filter(|key| key.starts_with(path)).collect();

        let page_limit = max_items.max(1).min(self.max_page);
        let mut index: usize = cookie.map(|c| c.parse().unwrap_or(0)).unwrap_or(0);
        let mut page = DirPage::default();
        let mut emitted = 0usize;

        while index < keys.len() && emitted < page_limit {
            let relative = &keys[index][path.len()..];
            if relative.is_empty() {
                index += 1;
                continue;
            }
            match relative.split_once('/') {
                Some((subdir, _)) => {
                    let subdir = subdir.to_string();
                    if !page.subdirs.contains(&subdir) {
                        page.subdirs.push(subdir.clone());
                        emitted += 1;
                    }
                    if self.flat_listing {
                        index += 1;
                    } else {
                        // Delimited listing: skip every key under this prefix.
                        let full = format!("{path}{subdir}/");
                        while index < keys.len() && keys[index].starts_with(&full) {
                            index += 1;
                        }
                    }
                }
                None => {
                    let object = &objects[keys[index].as_str()];
                    page.files.push(ListedFile {
                        basename: relative.to_string(),
                        etag: object.etag.clone(),
                        mtime: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
                        size: object.data.len() as u64,
                    });
                    emitted += 1;
                    index += 1;
                }
            }
        }

        page.next_cookie = (index < keys.len()).then(|| index.to_string());
        Ok(page)
    }

    async fn read_file(
        &self,
        path: &str,
        line_number: u64,
        if_match: Option<&str>,
    ) -> Result<ReadChunk, DriverError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .read_calls_by_line
            .lock()
            .unwrap()
            .entry((path.to_string(), line_number))
            .or_insert(0) += 1;

        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }

        let objects = self.objects.lock().unwrap();
        let object = objects.get(path).ok_or_else(|| DriverError::NotFound {
            key: path.to_string(),
        })?;
        if let Some(tag) = if_match {
            if tag != object.etag {
                return Err(DriverError::Stale {
                    key: path.to_string(),
                });
            }
        }

        let begin = (line_number * self.line_size).min(object.data.len() as u64) as usize;
        let stop = ((line_number + 1) * self.line_size).min(object.data.len() as u64) as usize;
        Ok(ReadChunk {
            etag: object.etag.clone(),
            bytes: Bytes::copy_from_slice(&object.data[begin..stop]),
        })
    }
}

/// Deterministic payload: `len` bytes derived from a seed.
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Poll until the core has no fetches in flight.
pub async fn wait_for_idle(core: &std::sync::Arc<msfs_vfs::Core>) {
    for _ in 0..200 {
        if core.stats().inbound_count == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("core never went idle: {:?}", core.stats());
}
