//! The metadata index: a narrow embedded ordered key-value capability
//! (design doc §4.5).
//!
//! The VFS never performs multi-key transactions. Set operations are
//! independent, and the `i:`/`d:` writes that accompany one inode
//! creation may become visible out of order under failure; [`crate::fs`]
//! repairs missing `d:` entries lazily via its `get_entry` fallback.

mod sled_store;

pub use sled_store::SledIndex;

use crate::error::Result;

/// A narrow ordered key-value capability: get, set, delete, prefix-scan.
///
/// Implementations must be thread-safe; the VFS calls through a shared
/// reference from multiple threads concurrently.
pub trait KvIndex: Send + Sync {
    /// Fetch the value for `key`, or `None` if absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Set `key` to `value`, independent of any other key.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Iterate all `(key, value)` pairs whose key starts with `prefix`,
    /// in lexicographic order. The iterator must be closeable (dropping
    /// it releases any resources it holds).
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Box<dyn PrefixScan>>;
}

/// A closeable iterator over `(key, value)` pairs yielded by
/// [`KvIndex::prefix_scan`].
pub trait PrefixScan: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> {
    /// Release any resources the scan holds (a cursor, a snapshot, ...).
    /// The default implementation does nothing; implementations that
    /// need to release resources eagerly rather than on `Drop` should
    /// override it.
    fn close(&mut self) {}
}
