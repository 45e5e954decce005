//! Per-open file handle state (design doc §4.2).

use std::io::Cursor;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fs::Fs;
use crate::inode::Inode;

struct FileHandleState {
    /// Logical size: for a write handle, bytes accepted so far; for a
    /// read handle, mirrors the inode's size at open time.
    size: u64,
    /// Current logical offset. Writes must arrive at exactly this
    /// offset (append-only); reads advance it too.
    offset: u64,
    /// Index of the next write frame to hand to the upload engine.
    next_frame_idx: u64,
    /// Whether [`FileHandle::prepare_write`] has registered a chunk.
    writing: bool,
}

/// Per-open state for a regular file. Reads pass straight through to the
/// backend; writes are staged by the upload engine (design doc §4.6).
pub struct FileHandle {
    /// The handle id the kernel adapter was given at `open`/`create`.
    pub id: u64,
    /// The inode this handle was opened against. Names, modes, and
    /// parentage never change over a handle's lifetime (rename is
    /// unsupported), so a snapshot is sufficient.
    pub inode: Inode,
    fs: Arc<Fs>,
    state: Mutex<FileHandleState>,
}

impl FileHandle {
    /// Open a handle against `inode`, read-only until
    /// [`FileHandle::prepare_write`] registers a chunk with the upload
    /// engine. `Fs::create` is the only caller that does so, immediately
    /// after opening the freshly created file: this core supports only
    /// sequential append during a single open-for-write session, not
    /// reopening an existing file for writing (design doc §1).
    pub(crate) fn new(id: u64, inode: Inode, fs: Arc<Fs>) -> Self {
        let size = inode.size;
        FileHandle {
            id,
            inode,
            fs,
            state: Mutex::new(FileHandleState {
                size,
                offset: 0,
                next_frame_idx: 0,
                writing: false,
            }),
        }
    }

    /// The handle's current logical size.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Read up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually copied into `buf`. Reads are stateless
    /// with respect to the upload engine: they always hit the backend.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let remaining = state.size.saturating_sub(offset);
        let want = (buf.len() as u64).min(remaining);
        if want == 0 {
            return Ok(0);
        }
        let mut cursor = Cursor::new(Vec::with_capacity(want as usize));
        let n = self.fs.backend().read(&self.inode.path, &mut cursor, offset, want)?;
        let data = cursor.into_inner();
        buf[..data.len()].copy_from_slice(&data);
        state.offset = offset + n;
        Ok(n as usize)
    }

    /// Register a new chunk with the upload engine, keyed on this
    /// handle's id. Must be called before the first [`FileHandle::write`].
    pub fn prepare_write(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.writing {
            return Ok(());
        }
        self.fs.upload_engine().prepare_write(self.id, self.inode.path.clone());
        state.writing = true;
        state.size = 0;
        state.offset = 0;
        state.next_frame_idx = 0;
        Ok(())
    }

    /// Write `buf` at `offset`. Requires `offset == current logical
    /// offset` (append-only); any other offset fails with
    /// [`Error::RandomWrite`] and leaves the handle's state unchanged.
    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.writing {
            log::warn!("write(handle {}): prepare_write was never called", self.id);
            return Err(Error::Unsupported("write before prepare_write"));
        }
        if offset != state.offset {
            return Err(Error::RandomWrite {
                offset,
                expected: state.offset,
            });
        }
        let frame_idx = state.next_frame_idx;
        self.fs.upload_engine().write_frame(self.id, frame_idx, buf)?;
        state.next_frame_idx += 1;
        state.size += buf.len() as u64;
        state.offset += buf.len() as u64;
        Ok(buf.len())
    }

    /// Best-effort drain (design doc §9): wait for the coordinator to
    /// have accounted for every frame submitted so far, without
    /// waiting on any in-flight part upload. A no-op for a handle that
    /// has never been written to.
    pub fn flush(&self) {
        let (writing, frame_count) = {
            let state = self.state.lock();
            (state.writing, state.next_frame_idx)
        };
        if writing {
            self.fs.upload_engine().drain(self.id, frame_count);
        }
    }

    /// Finalize the chunk (design doc §4.6's close path): upload
    /// whatever remains, complete any in-progress multipart upload, and
    /// drop the chunk from the upload engine's table. Returns the final
    /// byte size written.
    pub fn close_for_write(&self) -> Result<u64> {
        let (writing, size, frame_count) = {
            let state = self.state.lock();
            (state.writing, state.size, state.next_frame_idx)
        };
        if !writing {
            return Ok(size);
        }
        self.fs.upload_engine().close_for_write(self.id, frame_count)?;
        Ok(size)
    }
}
