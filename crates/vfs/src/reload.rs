//! Reconfiguration driver: add and remove backends in a running mount.
//!
//! `reload` diffs the desired backend set against the registry, constructs
//! driver contexts for additions, and runs the two-phase drain-then-destroy
//! teardown for removals. A backend present in both the old and the new set
//! is kept as-is even when its configuration differs; modifying a live
//! backend is deliberately unsupported. Reloads are serialized; handlers
//! keep serving throughout and only contend on the global lock for the
//! short critical sections.

use std::collections::HashSet;
use std::sync::Arc;

use msfs_common::ROOT_INODE;
use msfs_storage::{AisDriver, BackendDriver, S3Driver};

use crate::cache::LineState;
use crate::core::Core;
use crate::error::FsError;
use crate::options::{BackendSpec, DriverSpec};
use crate::registry::BackendId;

/// What one reload run did.
#[derive(Debug, Default)]
pub struct ReloadSummary {
    /// Backends installed by this run.
    pub added: Vec<String>,
    /// Backends drained and destroyed by this run.
    pub removed: Vec<String>,
    /// Backends present in both sets and left untouched.
    pub kept: Vec<String>,
    /// Additions whose driver context failed to construct.
    pub failed: Vec<String>,
}

impl Core {
    /// Construct the driver context for a backend spec.
    async fn build_driver(&self, spec: &BackendSpec) -> Result<Arc<dyn BackendDriver>, FsError> {
        let prefix = spec.validate()?;
        let line_size = self.opts.cache_line_size;
        match &spec.driver {
            DriverSpec::S3(options) => S3Driver::new(
                spec.bucket.clone(),
                prefix,
                line_size,
                spec.trace_level,
                options.clone(),
            )
            .await
            .map(|driver| Arc::new(driver) as Arc<dyn BackendDriver>)
            .map_err(|err| FsError::BackendInit {
                message: err.to_string(),
            }),
            DriverSpec::Aistore(options) => AisDriver::new(
                spec.bucket.clone(),
                prefix,
                line_size,
                spec.trace_level,
                options.clone(),
            )
            .map(|driver| Arc::new(driver) as Arc<dyn BackendDriver>)
            .map_err(|err| FsError::BackendInit {
                message: err.to_string(),
            }),
        }
    }

    /// Insert a constructed backend and allocate its synthetic root
    /// directory inode.
    fn install_backend(
        &self,
        dir_name: String,
        driver: Arc<dyn BackendDriver>,
    ) -> Result<BackendId, FsError> {
        let mut state = self.lock();
        let state = &mut *state;
        let id = state.registry.insert(dir_name, driver, 0)?;
        let root_ino = state.inodes.intern_dir(id, ROOT_INODE, String::new());
        if let Some(entry) = state.registry.get_mut(id) {
            entry.root_ino = root_ino;
        }
        Ok(id)
    }

    /// Register a backend with an already-constructed driver context.
    ///
    /// Embedders bind custom [`BackendDriver`] implementations through this;
    /// the config-driven path goes through [`register_backend`](Self::register_backend).
    pub fn register_driver(
        &self,
        dir_name: &str,
        driver: Arc<dyn BackendDriver>,
    ) -> Result<BackendId, FsError> {
        msfs_common::validate_dir_name(dir_name)?;
        self.install_backend(dir_name.to_string(), driver)
    }

    /// Register a single backend: construct its driver context, then make it
    /// visible.
    ///
    /// # Errors
    /// `AlreadyExists` for a duplicate `dir_name`; `BackendInit` when the
    /// driver context cannot be constructed. Either way the registry is left
    /// unchanged.
    pub async fn register_backend(self: &Arc<Self>, spec: &BackendSpec) -> Result<BackendId, FsError> {
        {
            let state = self.lock();
            if state.registry.lookup_dir(&spec.dir_name).is_some() {
                return Err(FsError::AlreadyExists {
                    dir_name: spec.dir_name.clone(),
                });
            }
        }
        let driver = self.build_driver(spec).await?;
        self.install_backend(spec.dir_name.clone(), driver)
    }

    /// Unregister a backend: mark it draining, reclaim its inodes and cache
    /// lines, wait for in-flight fetches to land, then destroy the driver
    /// context.
    pub async fn unregister_backend(self: &Arc<Self>, dir_name: &str) -> Result<(), FsError> {
        let backend_id = {
            let mut state = self.lock();
            let state = &mut *state;
            let id = state
                .registry
                .lookup_dir(dir_name)
                .ok_or(FsError::NotFound)?
                .id;

            // Draining first: no new inode lookups bind to this backend.
            state.registry.mark_draining(id);

            // Detach every inode bound to the backend. Clean lines leave the
            // LRU with their inode; inbound lines are implicitly orphaned -
            // their completing fetch re-looks the inode up, misses, and
            // discards the buffer.
            for ino in state.inodes.inos_for_backend(id) {
                if let Some(inode) = state.inodes.remove(ino) {
                    for (line_no, line) in &inode.lines {
                        if line.state == LineState::Clean {
                            state.clean_lru.remove(&(ino, *line_no));
                        }
                    }
                }
            }
            id
        };

        // Wait until the draining backend has no fetches in flight, then
        // drop the registry's reference to the driver context. The waiter is
        // enabled before the counter check so a completion landing in
        // between cannot be missed.
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                let drained = state
                    .registry
                    .get(backend_id)
                    .is_none_or(|entry| entry.inbound_count == 0);
                if drained {
                    state.registry.remove(backend_id);
                    break;
                }
            }
            notified.await;
        }

        log::info!("backend {dir_name} unregistered");
        Ok(())
    }

    /// Apply a new backend set to the running mount.
    ///
    /// Per-backend failures are logged and skipped; they never abort the
    /// reload. The entire run executes in this single caller; concurrent
    /// reloads queue behind it.
    pub async fn reload(self: &Arc<Self>, specs: &[BackendSpec]) -> ReloadSummary {
        let _guard = self.reload_lock.lock().await;
        let mut summary = ReloadSummary::default();

        // Desired set keyed by dir_name; later duplicates lose.
        let mut desired: Vec<&BackendSpec> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for spec in specs {
            if seen.insert(spec.dir_name.as_str()) {
                desired.push(spec);
            } else {
                log::warn!("duplicate backend dir_name {} in config, ignoring", spec.dir_name);
            }
        }

        let existing: HashSet<String> = self.lock().registry.dir_names().into_iter().collect();

        let to_remove: Vec<String> = existing
            .iter()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect();

        // Construct contexts for additions before touching the registry.
        let mut constructed: Vec<(&BackendSpec, Arc<dyn BackendDriver>)> = Vec::new();
        for &spec in &desired {
            if existing.contains(&spec.dir_name) {
                summary.kept.push(spec.dir_name.clone());
                continue;
            }
            match self.build_driver(spec).await {
                Ok(driver) => constructed.push((spec, driver)),
                Err(err) => {
                    log::warn!("skipping backend {}: {err}", spec.dir_name);
                    summary.failed.push(spec.dir_name.clone());
                }
            }
        }

        for dir_name in to_remove {
            match self.unregister_backend(&dir_name).await {
                Ok(()) => summary.removed.push(dir_name),
                Err(err) => {
                    log::warn!("failed to unregister backend {dir_name}: {err}");
                }
            }
        }

        for (spec, driver) in constructed {
            match self.install_backend(spec.dir_name.clone(), driver) {
                Ok(_) => summary.added.push(spec.dir_name.clone()),
                Err(err) => {
                    log::warn!("failed to install backend {}: {err}", spec.dir_name);
                    summary.failed.push(spec.dir_name.clone());
                }
            }
        }

        log::info!(
            "reload complete: {} added, {} removed, {} kept, {} failed",
            summary.added.len(),
            summary.removed.len(),
            summary.kept.len(),
            summary.failed.len(),
        );
        summary
    }
}
