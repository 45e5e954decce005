//! Handle tables: in-memory maps from a kernel-visible handle id to open
//! file/directory state (design doc §4.3).

pub mod dir;
pub mod file;

pub use dir::DirHandle;
pub use file::FileHandle;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A process-wide monotonic id allocator. Used for both inode ids and
/// handle ids (design doc §4.3, §9): ids are never reused within a
/// process lifetime.
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// An allocator whose first call to [`IdAllocator::next`] returns
    /// `start`.
    pub fn starting_at(start: u64) -> Self {
        IdAllocator {
            next: AtomicU64::new(start),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// A concurrent map from handle id to open handle state, guarded by a
/// single mutex (design doc §4.3).
pub struct HandleTable<T> {
    handles: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> HandleTable<T> {
    /// An empty table.
    pub fn new() -> Self {
        HandleTable {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handle under `id`.
    pub fn set(&self, id: u64, handle: Arc<T>) {
        self.handles.lock().insert(id, handle);
    }

    /// Look up a handle by id.
    pub fn get(&self, id: u64) -> Option<Arc<T>> {
        self.handles.lock().get(&id).cloned()
    }

    /// Remove a handle by id, returning it if it was present.
    pub fn delete(&self, id: u64) -> Option<Arc<T>> {
        self.handles.lock().remove(&id)
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn id_allocator_never_repeats_under_contention() {
        let alloc = StdArc::new(IdAllocator::starting_at(1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let alloc = alloc.clone();
            handles.push(thread::spawn(move || {
                (0..100).map(|_| alloc.next()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "id {id} allocated twice");
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn set_get_delete_round_trip() {
        let table: HandleTable<u32> = HandleTable::new();
        table.set(1, Arc::new(7));
        assert_eq!(*table.get(1).unwrap(), 7);
        assert_eq!(table.delete(1).map(|v| *v), Some(7));
        assert!(table.get(1).is_none());
    }
}
