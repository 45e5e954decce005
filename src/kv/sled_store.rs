//! A [`KvIndex`] backed by `sled`, an embedded ordered key-value store.
//!
//! `sled` plays the role `badger` (an embedded ordered LSM key-value
//! store) plays in the ancestor design: a pure-Rust, transactionally
//! consistent per-key store that can run purely in memory for tests or
//! rooted at a filesystem path for a real mount.

use std::path::Path;

use super::{KvIndex, PrefixScan};
use crate::error::Result;

/// An embedded ordered key-value index.
pub struct SledIndex {
    db: sled::Db,
}

impl SledIndex {
    /// Open (or create) the index rooted at `path` on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        Ok(SledIndex { db })
    }

    /// An index that exists only in memory, discarded on drop. Suitable
    /// for tests and ephemeral mounts.
    pub fn in_memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(SledIndex { db })
    }
}

impl KvIndex for SledIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Box<dyn PrefixScan>> {
        Ok(Box::new(SledPrefixScan {
            inner: self.db.scan_prefix(prefix),
        }))
    }
}

struct SledPrefixScan {
    inner: sled::Iter,
}

impl Iterator for SledPrefixScan {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|res| res.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
    }
}

impl PrefixScan for SledPrefixScan {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let idx = SledIndex::in_memory().unwrap();
        idx.set(b"i:1", b"payload").unwrap();
        assert_eq!(idx.get(b"i:1").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn get_missing_key_returns_none() {
        let idx = SledIndex::in_memory().unwrap();
        assert_eq!(idx.get(b"missing").unwrap(), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let idx = SledIndex::in_memory().unwrap();
        idx.set(b"k", b"v").unwrap();
        idx.delete(b"k").unwrap();
        idx.delete(b"k").unwrap();
        assert_eq!(idx.get(b"k").unwrap(), None);
    }

    #[test]
    fn prefix_scan_yields_lexicographic_order() {
        let idx = SledIndex::in_memory().unwrap();
        idx.set(b"d:1:b", b"2").unwrap();
        idx.set(b"d:1:a", b"1").unwrap();
        idx.set(b"d:1:c", b"3").unwrap();
        idx.set(b"d:2:a", b"other").unwrap();

        let mut scan = idx.prefix_scan(b"d:1:").unwrap();
        let first = scan.next().unwrap().unwrap();
        let second = scan.next().unwrap().unwrap();
        let third = scan.next().unwrap().unwrap();
        assert!(scan.next().is_none());

        assert_eq!(first.0, b"d:1:a");
        assert_eq!(second.0, b"d:1:b");
        assert_eq!(third.0, b"d:1:c");
    }

    #[test]
    fn open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let idx = SledIndex::open(dir.path()).unwrap();
            idx.set(b"i:1", b"root").unwrap();
        }
        let idx = SledIndex::open(dir.path()).unwrap();
        assert_eq!(idx.get(b"i:1").unwrap(), Some(b"root".to_vec()));
    }
}
