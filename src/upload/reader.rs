//! A streaming reader over cache-store frames (design doc §9,
//! "pipe-from-cache-store").
//!
//! The source models this as an OS pipe fed by a producer goroutine.
//! Rust's synchronous [`std::io::Read`] already gives a backend
//! consumer pull-based backpressure, so this reader just pulls frames
//! from the cache store lazily, one at a time, as the consumer asks for
//! bytes — no extra thread required.

use std::io::{self, Cursor, Read};
use std::sync::Arc;

use crate::cache::CacheStore;

pub(crate) struct ChunkReader {
    cache: Arc<dyn CacheStore>,
    handle_id: u64,
    next_idx: u64,
    end_idx: u64,
    current: Option<Cursor<Vec<u8>>>,
}

impl ChunkReader {
    /// Stream frames `[start, end)` for `handle_id`, in order.
    pub(crate) fn new(cache: Arc<dyn CacheStore>, handle_id: u64, start: u64, end: u64) -> Self {
        ChunkReader {
            cache,
            handle_id,
            next_idx: start,
            end_idx: end,
            current: None,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(cursor) = &mut self.current {
                let n = cursor.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                self.current = None;
            }
            if self.next_idx >= self.end_idx {
                return Ok(0);
            }
            let key = format!("{}-{}", self.handle_id, self.next_idx);
            let mut frame = Vec::new();
            self.cache.read(&key, &mut frame).map_err(io::Error::other)?;
            self.next_idx += 1;
            self.current = Some(Cursor::new(frame));
        }
    }
}
