//! Per-open directory handle state (design doc §4.2).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::ObjectIterator;
use crate::error::Result;
use crate::fs::Fs;
use crate::inode::Inode;

struct DirHandleState {
    iterator: Box<dyn ObjectIterator>,
    exhausted: bool,
}

/// A lazy iterator over a backend directory listing (design doc §4.2).
///
/// Multiple `readdir` calls against the same handle see a consistent,
/// non-restartable sequence: once [`DirHandle::next`] returns `None`, it
/// keeps returning `None`.
pub struct DirHandle {
    /// The handle id the kernel adapter was given at `opendir`.
    pub id: u64,
    /// The inode of the directory this handle was opened against;
    /// children are parented to this inode's id.
    pub inode: Inode,
    fs: Arc<Fs>,
    state: Mutex<DirHandleState>,
}

impl DirHandle {
    pub(crate) fn new(id: u64, inode: Inode, fs: Arc<Fs>, iterator: Box<dyn ObjectIterator>) -> Self {
        DirHandle {
            id,
            inode,
            fs,
            state: Mutex::new(DirHandleState {
                iterator,
                exhausted: false,
            }),
        }
    }

    /// Pull the next child, allocating and persisting an inode for it if
    /// this is the first time it has been observed under this parent.
    /// Returns `None` once the backend listing is drained; every call
    /// after that also returns `None`.
    pub fn next(&self) -> Result<Option<Inode>> {
        let mut state = self.state.lock();
        if state.exhausted {
            return Ok(None);
        }
        let object = match state.iterator.next_object()? {
            Some(o) => o,
            None => {
                state.exhausted = true;
                return Ok(None);
            }
        };
        let name = object.path.rsplit('/').next().unwrap_or(&object.path).to_string();
        let inode = self
            .fs
            .entry_for_object(self.inode.id, &name, &object)?;
        Ok(Some(inode))
    }
}
