//! A memory-backed [`CacheStore`]. The design doc calls this "acceptable"
//! (§6); it also keeps the test suite free of filesystem dependencies.

use std::collections::HashMap;
use std::io::{Read, Write};

use parking_lot::Mutex;

use super::CacheStore;
use crate::error::{Error, Result};

/// An in-memory cache store keyed by frame key (`"<handle_id>-<frame_idx>"`).
#[derive(Default)]
pub struct MemoryCacheStore {
    frames: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    /// An empty cache store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn write(&self, key: &str, reader: &mut dyn Read, size: u64) -> Result<u64> {
        let mut buf = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut buf)?;
        let n = buf.len() as u64;
        self.frames.lock().insert(key.to_string(), buf);
        Ok(n)
    }

    fn read(&self, key: &str, writer: &mut dyn Write) -> Result<u64> {
        let frames = self.frames.lock();
        let data = frames.get(key).ok_or(Error::NotFound)?;
        writer.write_all(data)?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_then_read_round_trips() {
        let store = MemoryCacheStore::new();
        store.write("1-0", &mut Cursor::new(b"hello".to_vec()), 5).unwrap();
        let mut out = Vec::new();
        let n = store.read("1-0", &mut out).unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn read_missing_key_is_not_found() {
        let store = MemoryCacheStore::new();
        let mut out = Vec::new();
        assert!(matches!(store.read("missing", &mut out), Err(Error::NotFound)));
    }
}
