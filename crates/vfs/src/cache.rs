//! Cache-line engine: allocation, fetch coalescing, LRU eviction, prefetch.
//!
//! Object content is cached in fixed-size lines addressed by
//! `(inode, line_number)`. The first reader to miss a line allocates it in
//! `Inbound` and spawns exactly one fetch worker; every other concurrent
//! reader of that line attaches to the same one-shot latch and is released
//! when the fetch completes. Clean lines sit on a global LRU and are evicted
//! once the slot budget is exceeded; `Inbound` lines are never evicted, which
//! is what keeps the coalescing guarantee sound.
//!
//! The latch carries the fetched bytes, not just a wakeup: a waiter holds the
//! line's content even if the line is evicted between completion and the
//! waiter's turn on the lock, so a one-slot cache still serves arbitrarily
//! large reads.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::core::{Core, CoreState, LineKey};
use crate::error::FsError;
use crate::inode::InodeKind;
use crate::registry::BackendId;

/// Cache line states.
///
/// `Outbound` and `Dirty` belong to the write path; the filesystem is
/// read-only, so they are never constructed, but the enumeration keeps all
/// four states so write support will not change the in-memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineState {
    /// Fetch in flight; not on the LRU.
    Inbound,
    /// Content resident; on the clean-LRU exactly once.
    Clean,
    /// Write-back in flight (write path).
    #[allow(dead_code)]
    Outbound,
    /// Modified and not yet written back (write path).
    #[allow(dead_code)]
    Dirty,
}

/// Terminal error carried to a line's waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineError {
    /// ETag precondition failed, or the inode vanished mid-fetch.
    Stale,
    /// The backend failed to produce the line.
    Io,
}

/// What a waiter receives when its line reaches a terminal state.
pub(crate) type LineOutcome = Result<Bytes, LineError>;

/// One-shot multi-consumer latch: any number of waiters clone it, all are
/// released by the single `send` from the fetch worker.
pub(crate) type LineLatch = Shared<BoxFuture<'static, LineOutcome>>;

/// One fixed-size chunk of an object's content.
pub(crate) struct CacheLine {
    pub state: LineState,
    /// ETag observed when the line was fetched. Empty until `Clean`.
    pub etag: String,
    /// Line content. Empty until `Clean`.
    pub buf: Bytes,
    /// Completion latch; present while `Inbound`.
    pub latch: Option<LineLatch>,
}

fn new_latch() -> (oneshot::Sender<LineOutcome>, LineLatch) {
    let (tx, rx) = oneshot::channel();
    let latch = async move {
        // A dropped sender means the worker died without reporting; surface
        // it as an I/O failure rather than hanging the waiter.
        rx.await.unwrap_or(Err(LineError::Io))
    }
    .boxed()
    .shared();
    (tx, latch)
}

/// Evict least-recently-used clean lines while over the slot budget.
///
/// Called under the global lock. `Inbound` lines are untouchable here; if
/// the LRU runs dry while still over budget, eviction yields and the
/// situation resolves as in-flight fetches land.
pub(crate) fn prune_if_over_capacity(state: &mut CoreState, cache_lines: u64) {
    while state.inbound_count + state.clean_lru.len() as u64 > cache_lines {
        let Some(((ino, line_no), ())) = state.clean_lru.pop_front() else {
            return;
        };
        match state.inodes.get_mut(ino) {
            Some(inode) => {
                if inode.lines.remove(&line_no).is_none() {
                    log::warn!("evicted line {line_no} missing from inode {ino} cache map");
                }
            }
            None => {
                log::warn!("evicted line {line_no} belongs to missing inode {ino}");
            }
        }
    }
}

/// Move a clean line to the MRU end.
fn touch_line(state: &mut CoreState, key: LineKey) {
    if state.clean_lru.remove(&key).is_some() {
        state.clean_lru.insert(key, ());
    }
}

/// How a single line of a read request will be satisfied.
enum LinePlan {
    /// Content was resident at plan time.
    Ready(Bytes),
    /// Wait on the line's completion latch.
    Wait(LineLatch),
}

impl Core {
    /// Read `length` bytes of the object at `ino` starting at `offset`.
    ///
    /// This is the internal read entry point consumed by the request
    /// handlers; it operates below the handle layer. Reads past
    /// end-of-object are EOF-truncated; a read at or past the object size
    /// returns zero bytes.
    pub async fn read_inode(
        self: &Arc<Self>,
        ino: u64,
        offset: u64,
        length: u32,
    ) -> Result<Bytes, FsError> {
        let line_size = self.opts.cache_line_size;

        // Plan every line under one hold of the global lock: capture resident
        // content, attach to in-flight lines, allocate and schedule misses.
        let (first_line, end, plans) = {
            let mut state = self.lock();
            let state = &mut *state;

            let inode = state.inodes.get(ino).ok_or(FsError::Stale)?;
            if inode.kind != InodeKind::File {
                return Err(FsError::NotAFile);
            }
            let size = inode.size;
            let backend_id = inode.backend;

            if length == 0 || offset >= size {
                return Ok(Bytes::new());
            }
            let end = size.min(offset + u64::from(length));
            let first_line = offset / line_size;
            let last_line = (end - 1) / line_size;

            let mut plans: Vec<(u64, LinePlan)> = Vec::new();
            let mut missed = false;
            for line_no in first_line..=last_line {
                let plan = match self.plan_line(state, ino, line_no) {
                    Some(plan) => plan,
                    None => {
                        missed = true;
                        self.schedule_fetch(state, ino, backend_id, line_no)
                    }
                };
                plans.push((line_no, plan));
            }

            // A miss schedules the prefetch window past the first requested
            // line; prefetched lines are fetched exactly like misses but
            // nobody waits on them here.
            if missed && self.opts.prefetch_window > 0 {
                let object_last = (size - 1) / line_size;
                let window_end = first_line
                    .saturating_add(self.opts.prefetch_window)
                    .min(object_last);
                for line_no in (first_line + 1)..=window_end {
                    let resident = state
                        .inodes
                        .get(ino)
                        .is_some_and(|inode| inode.lines.contains_key(&line_no));
                    if !resident {
                        self.schedule_fetch(state, ino, backend_id, line_no);
                    }
                }
            }

            prune_if_over_capacity(state, self.opts.cache_lines);
            (first_line, end, plans)
        };

        // Wait outside the lock for every line that was in flight.
        let mut settled: Vec<(u64, Bytes)> = Vec::with_capacity(plans.len());
        for (line_no, plan) in plans {
            let bytes = match plan {
                LinePlan::Ready(bytes) => bytes,
                LinePlan::Wait(latch) => match latch.await {
                    Ok(bytes) => bytes,
                    Err(LineError::Stale) => return Err(FsError::Stale),
                    Err(LineError::Io) => {
                        return Err(FsError::Io {
                            message: format!("cache line {line_no} fetch failed"),
                        })
                    }
                },
            };
            settled.push((line_no, bytes));
        }

        // Promote touched lines, then assemble the response.
        {
            let mut state = self.lock();
            let state = &mut *state;
            for (line_no, _) in &settled {
                let key = (ino, *line_no);
                let is_clean = state
                    .inodes
                    .get(ino)
                    .and_then(|inode| inode.lines.get(line_no))
                    .is_some_and(|line| line.state == LineState::Clean);
                if is_clean {
                    touch_line(state, key);
                }
            }
        }

        let mut out = BytesMut::with_capacity((end - offset) as usize);
        for (line_no, bytes) in settled {
            let line_start = line_no * line_size;
            let begin = offset.max(line_start) - line_start;
            let stop = (end.min(line_start + line_size) - line_start).min(bytes.len() as u64);
            if begin < stop {
                out.extend_from_slice(&bytes[begin as usize..stop as usize]);
            }
        }
        Ok(out.freeze())
    }

    /// Plan a resident or in-flight line, or `None` on a miss.
    ///
    /// Counters: a resident or coalesced line is a hit; the caller accounts
    /// the miss when it schedules the fetch.
    fn plan_line(&self, state: &mut CoreState, ino: u64, line_no: u64) -> Option<LinePlan> {
        let inode = state.inodes.get(ino)?;
        let line = inode.lines.get(&line_no)?;
        let plan = match line.state {
            LineState::Clean => LinePlan::Ready(line.buf.clone()),
            LineState::Inbound => LinePlan::Wait(
                line.latch
                    .clone()
                    .expect("inbound cache line must carry its latch"),
            ),
            LineState::Outbound | LineState::Dirty => {
                unreachable!("write-path cache line state in read-only mode")
            }
        };
        state.hit_count += 1;
        Some(plan)
    }

    /// Allocate a line in `Inbound` and spawn its fetch worker.
    ///
    /// Called under the global lock for a line known to be absent.
    fn schedule_fetch(
        self: &Arc<Self>,
        state: &mut CoreState,
        ino: u64,
        backend_id: BackendId,
        line_no: u64,
    ) -> LinePlan {
        let (tx, latch) = new_latch();

        if let Some(inode) = state.inodes.get_mut(ino) {
            inode.lines.insert(
                line_no,
                CacheLine {
                    state: LineState::Inbound,
                    etag: String::new(),
                    buf: Bytes::new(),
                    latch: Some(latch.clone()),
                },
            );
        }
        state.inbound_count += 1;
        state.miss_count += 1;
        if let Some(entry) = state.registry.get_mut(backend_id) {
            entry.inbound_count += 1;
        }

        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.run_fetch(ino, backend_id, line_no, tx).await;
        });

        LinePlan::Wait(latch)
    }

    /// Fetch worker: one task per allocated `Inbound` line.
    async fn run_fetch(
        self: Arc<Self>,
        ino: u64,
        backend_id: BackendId,
        line_no: u64,
        tx: oneshot::Sender<LineOutcome>,
    ) {
        // Snapshot the binding under the lock, then do I/O outside it.
        let snapshot = {
            let state = self.lock();
            state.inodes.get(ino).and_then(|inode| {
                state
                    .registry
                    .get(backend_id)
                    .map(|entry| (entry.driver.clone(), inode.key.clone(), inode.etag.clone()))
            })
        };

        let result = match snapshot {
            Some((driver, key, etag)) => {
                let if_match = (!etag.is_empty()).then_some(etag);
                driver
                    .read_file(&key, line_no, if_match.as_deref())
                    .await
                    .map(|chunk| (chunk.etag, chunk.bytes))
                    .map_err(|err| {
                        log::warn!("fetch of inode {ino} line {line_no} failed: {err}");
                        match err {
                            msfs_storage::DriverError::Stale { .. } => LineError::Stale,
                            _ => LineError::Io,
                        }
                    })
            }
            None => {
                // The inode or backend went away before the fetch started;
                // nothing to read.
                Err(LineError::Stale)
            }
        };

        self.finish_fetch(ino, backend_id, line_no, result, tx);
    }

    /// Commit a fetch result under the lock and release the waiters.
    ///
    /// The latch is fired while the lock is held, so every attached waiter
    /// observes the line's terminal state. A completion whose inode has been
    /// removed (reconfigure-remove) discards the buffer and only settles the
    /// counters; this is the sole mechanism by which in-flight fetches learn
    /// of inode removal.
    fn finish_fetch(
        &self,
        ino: u64,
        backend_id: BackendId,
        line_no: u64,
        result: Result<(String, Bytes), LineError>,
        tx: oneshot::Sender<LineOutcome>,
    ) {
        let mut drained = false;
        {
            let mut state = self.lock();
            let state = &mut *state;

            state.inbound_count = state.inbound_count.saturating_sub(1);
            if let Some(entry) = state.registry.get_mut(backend_id) {
                entry.inbound_count = entry.inbound_count.saturating_sub(1);
                if entry.draining && entry.inbound_count == 0 {
                    drained = true;
                }
            }

            let outcome: LineOutcome = match (result, state.inodes.get_mut(ino)) {
                (Ok((etag, bytes)), Some(inode)) => match inode.lines.get_mut(&line_no) {
                    Some(line) => {
                        line.state = LineState::Clean;
                        line.etag = etag;
                        line.buf = bytes.clone();
                        line.latch = None;
                        state.clean_lru.insert((ino, line_no), ());
                        Ok(bytes)
                    }
                    None => {
                        log::warn!(
                            "fetched line {line_no} missing from inode {ino} cache map"
                        );
                        Err(LineError::Stale)
                    }
                },
                (Ok(_), None) => {
                    log::warn!(
                        "fetch for removed inode {ino} line {line_no} completed; discarding"
                    );
                    Err(LineError::Stale)
                }
                (Err(err), inode) => {
                    // Failed lines are not retained: the next read of this
                    // line schedules a fresh fetch.
                    if let Some(inode) = inode {
                        inode.lines.remove(&line_no);
                    }
                    Err(err)
                }
            };

            prune_if_over_capacity(state, self.opts.cache_lines);

            // Waiter notification happens under the lock; send never blocks.
            let _ = tx.send(outcome);
        }

        if drained {
            self.drained.notify_waiters();
        }
    }

    /// The `(inode, line_number)` keys on the clean-LRU, LRU first.
    pub fn clean_lru_snapshot(&self) -> Vec<LineKey> {
        self.lock().clean_lru.keys().copied().collect()
    }
}
