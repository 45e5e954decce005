//! Per-write-handle staging state (design doc §3.4).

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

use crate::backend::{MultipartUpload, Part};

pub(crate) struct ChunkInner {
    /// Index of the next frame the coordinator has accounted for.
    pub next_idx: u64,
    /// Total bytes accounted for by the coordinator so far.
    pub current_size: u64,
    /// Index of the next frame not yet handed to an upload task.
    pub persisted_idx: u64,
    /// Bytes already handed to an upload task (whole-object write or a
    /// completed part snapshot).
    pub persisted_size: u64,
    /// The next part number the coordinator will assign.
    pub next_part_number: u64,
    /// Set once the chunk has crossed the multipart threshold.
    pub upload: Option<MultipartUpload>,
    /// Completed parts, keyed by part number.
    pub parts: HashMap<u64, Part>,
    /// Set by an upload worker that hit a `write_multipart` error
    /// (design doc §4.6 "Upload worker" step 3, §7). Once set,
    /// `close_for_write` must surface this instead of calling
    /// `complete_multipart` with a gap in `parts`.
    pub failed: Option<String>,
}

/// A simple wait-group: callers `add` before submitting concurrent work
/// and `done` when it completes; `wait` blocks until the count returns
/// to zero.
pub(crate) struct WaitGroup {
    pending: Mutex<u64>,
    cvar: Condvar,
}

impl WaitGroup {
    fn new() -> Self {
        WaitGroup {
            pending: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    pub(crate) fn add(&self, n: u64) {
        *self.pending.lock() += n;
    }

    pub(crate) fn done(&self) {
        let mut pending = self.pending.lock();
        debug_assert!(*pending > 0, "wait-group underflow");
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.cvar.notify_all();
        }
    }

    pub(crate) fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.cvar.wait(&mut pending);
        }
    }
}

/// The per-open-for-write staging area (design doc §3.4).
pub(crate) struct Chunk {
    pub handle_id: u64,
    pub path: String,
    pub inner: Mutex<ChunkInner>,
    pub wait_group: WaitGroup,
    /// Signaled by the coordinator every time it advances `next_idx`,
    /// so `close_for_write` can wait for the coordinator to catch up
    /// to every frame the write handle has actually submitted before
    /// it reads `next_idx`/`persisted_idx` (the coordinator runs off a
    /// channel, asynchronously with respect to the writer).
    pub advanced: Condvar,
}

impl Chunk {
    pub(crate) fn new(handle_id: u64, path: String) -> Self {
        Chunk {
            handle_id,
            path,
            inner: Mutex::new(ChunkInner {
                next_idx: 0,
                current_size: 0,
                persisted_idx: 0,
                persisted_size: 0,
                next_part_number: 1,
                upload: None,
                parts: HashMap::new(),
                failed: None,
            }),
            wait_group: WaitGroup::new(),
            advanced: Condvar::new(),
        }
    }

    /// Block until the coordinator has accounted for at least
    /// `frame_count` frames.
    pub(crate) fn wait_for_frame_count(&self, frame_count: u64) {
        let mut inner = self.inner.lock();
        while inner.next_idx < frame_count {
            self.advanced.wait(&mut inner);
        }
    }
}
